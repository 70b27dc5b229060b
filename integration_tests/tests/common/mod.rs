use std::path::PathBuf;
use std::sync::Once;

static INIT: Once = Once::new();

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Points every config override at `tests/fixtures/`. Safe to call from each test.
pub fn ensure_test_config() {
    INIT.call_once(|| {
        for (var, name) in [
            ("SIM_CONFIG_PATH", "test_simulation_config.json"),
            ("STAGE_TABLE_PATH", "test_stage_table.json"),
            ("CONVERSION_MAPPINGS_PATH", "test_conversion_mappings.json"),
        ] {
            let path = fixture(name);
            debug_assert!(path.exists(), "missing test fixture at {}", path.display());
            std::env::set_var(var, &path);
        }
    });
}
