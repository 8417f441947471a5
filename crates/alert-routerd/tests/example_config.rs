//! The shipped example configuration stays loadable and fully valid.

use std::path::PathBuf;

use alert_router::{Destination, compile_routes};
use alert_routerd::DaemonConfig;

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../config/alert-router.example.toml")
}

#[test]
fn test_example_config_loads() {
    let config = DaemonConfig::from_file(example_path()).expect("example config");
    assert!(!config.email.is_configured());
    assert!(config.server.auth_token.is_none());
}

#[test]
fn test_every_example_route_compiles() {
    let config = DaemonConfig::from_file(example_path()).expect("example config");
    let routes = compile_routes(&config.routes);
    assert_eq!(routes.len(), config.routes.len());

    let oncall = &routes[0];
    assert_eq!(oncall.name(), "oncall");
    assert!(matches!(oncall.destinations()[0], Destination::Chat { .. }));
    assert!(matches!(oncall.destinations()[1], Destination::Email { .. }));
}
