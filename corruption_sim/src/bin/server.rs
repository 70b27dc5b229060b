use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use corruption_sim::network::{start_sync_server, SyncServer};
use corruption_sim::{
    add_progress, build_headless_app, load_region, reset_corruption, run_tick, save_now,
    start_cleansing, take_sync_frame, ActorId, BlockPos, CorruptionState, GridWorld,
    ProgressCategory, RegionKey, SimulationConfig, StageTableHandle, Viewer, WorldAccess,
};

const VIEW_RADIUS: i32 = 2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = build_headless_app();
    let config = app.world.resource::<SimulationConfig>().clone();

    let sync_server = start_sync_server(config.sync_bind);
    let Some(command_rx) = spawn_command_listener(config.command_bind) else {
        return;
    };

    info!(
        target: "corruption::server",
        command_bind = %config.command_bind,
        sync_bind = %config.sync_bind,
        world = %config.world_id,
        "server.ready"
    );

    while let Ok(command) = command_rx.recv() {
        match command {
            Command::Tick(ticks) => {
                for _ in 0..ticks {
                    run_tick(&mut app);
                    broadcast_sync(&mut app, sync_server.as_ref());
                }
                log_status(&app);
            }
            Command::Progress { category, amount } => {
                let value = add_progress(&mut app, category, amount);
                info!(target: "corruption::server", %category, amount, value, "command.applied=progress");
            }
            Command::Corrupt { x, z, amount } => {
                apply_field_action(&mut app, x, z, amount);
            }
            Command::Purify { x, z, amount } => {
                apply_field_action(&mut app, x, z, -amount);
            }
            Command::Viewer { id, x, z } => {
                place_viewer(&mut app, id, x, z);
            }
            Command::Cleanse { actor } => {
                let started = start_cleansing(&mut app, ActorId(actor));
                info!(target: "corruption::server", actor, started, "command.applied=cleanse");
            }
            Command::Reset => {
                let stage = reset_corruption(&mut app);
                warn!(target: "corruption::server", %stage, "command.applied=reset");
            }
            Command::Save => match save_now(&mut app) {
                Ok(bytes) => info!(target: "corruption::server", bytes, "command.applied=save"),
                Err(err) => warn!(target: "corruption::server", error = %err, "save.failed"),
            },
            Command::Status => log_status(&app),
        }
    }
}

#[derive(Debug)]
enum Command {
    Tick(u32),
    Progress { category: ProgressCategory, amount: i64 },
    Corrupt { x: i32, z: i32, amount: i32 },
    Purify { x: i32, z: i32, amount: i32 },
    Viewer { id: u64, x: i32, z: i32 },
    Cleanse { actor: u64 },
    Reset,
    Save,
    Status,
}

fn spawn_command_listener(bind_addr: std::net::SocketAddr) -> Option<Receiver<Command>> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(target: "corruption::server", bind = %bind_addr, error = %err, "command.bind_failed");
            return None;
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        warn!(target: "corruption::server", error = %err, "command.nonblocking_failed");
        return None;
    }

    let (sender, receiver) = unbounded::<Command>();
    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(target: "corruption::server", %addr, "command.client_connected");
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(err) => {
                warn!(target: "corruption::server", error = %err, "command.accept_failed");
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }
    });

    Some(receiver)
}

fn handle_client(stream: std::net::TcpStream, sender: Sender<Command>) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(target: "corruption::server", error = %err, "command.blocking_failed");
    }
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(cmd) => {
                        if sender.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => warn!(target: "corruption::server", input = trimmed, "command.invalid"),
                }
            }
            Err(err) => {
                warn!(target: "corruption::server", error = %err, "command.read_failed");
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "tick" => {
            let amount = parts.next().unwrap_or("1").parse().ok()?;
            Some(Command::Tick(amount))
        }
        "progress" => {
            let category = ProgressCategory::from_name(parts.next()?)?;
            let amount: i64 = parts.next()?.parse().ok()?;
            Some(Command::Progress { category, amount })
        }
        verb @ ("corrupt" | "purify") => {
            let x: i32 = parts.next()?.parse().ok()?;
            let z: i32 = parts.next()?.parse().ok()?;
            let amount: i32 = parts.next().unwrap_or("10").parse().ok()?;
            let amount = amount.max(0);
            if verb == "corrupt" {
                Some(Command::Corrupt { x, z, amount })
            } else {
                Some(Command::Purify { x, z, amount })
            }
        }
        "viewer" => {
            let id: u64 = parts.next()?.parse().ok()?;
            let x: i32 = parts.next()?.parse().ok()?;
            let z: i32 = parts.next()?.parse().ok()?;
            Some(Command::Viewer { id, x, z })
        }
        "cleanse" => {
            let actor: u64 = parts.next()?.parse().ok()?;
            Some(Command::Cleanse { actor })
        }
        "reset" => Some(Command::Reset),
        "save" => Some(Command::Save),
        "status" => Some(Command::Status),
        _ => None,
    }
}

/// Positive amounts corrupt the block column's region, negative purify it.
fn apply_field_action(app: &mut bevy::prelude::App, x: i32, z: i32, amount: i32) {
    let region = RegionKey::containing(x, z);
    let now = corruption_sim::current_tick(app);
    let mut state = app.world.resource_mut::<CorruptionState>();
    let intensity = if amount >= 0 {
        state.on_corrupting_action(region, amount, now)
    } else {
        state.on_purifying_action(region, -amount, now)
    };
    info!(
        target: "corruption::server",
        region_x = region.x,
        region_z = region.z,
        amount,
        intensity,
        "command.applied=field_action"
    );
}

fn place_viewer(app: &mut bevy::prelude::App, id: u64, x: i32, z: i32) {
    let region = RegionKey::containing(x, z);
    for dx in -VIEW_RADIUS..=VIEW_RADIUS {
        for dz in -VIEW_RADIUS..=VIEW_RADIUS {
            load_region(app, region.offset(dx, dz));
        }
    }
    let mut grid = app.world.resource_mut::<GridWorld>();
    let y = grid.surface_height(x, z).unwrap_or(64);
    let position = BlockPos::new(x, y, z);
    if !grid.move_viewer(id, position) {
        grid.add_viewer(Viewer { id, position });
    }
    info!(target: "corruption::server", viewer = id, x, y, z, "command.applied=viewer");
}

fn broadcast_sync(app: &mut bevy::prelude::App, server: Option<&SyncServer>) {
    let Some(frame) = take_sync_frame(app) else {
        return;
    };
    if let Some(server) = server {
        server.broadcast_frame(&frame);
    }
}

fn log_status(app: &bevy::prelude::App) {
    let table = app.world.resource::<StageTableHandle>().get();
    let state = app.world.resource::<CorruptionState>();
    let grid = app.world.resource::<GridWorld>();
    let stage = state.current_stage(&table);
    info!(
        target: "corruption::server",
        tick = corruption_sim::current_tick(app),
        total = state.total_progress(),
        %stage,
        stage_name = %table.stage(stage).name,
        cells = state.field().len(),
        blighted = state.blight().total_positions(),
        actors = grid.actor_count(),
        "status"
    );
}
