use glowd::config::Config;

// All environment manipulation lives in one test so parallel execution
// cannot interleave set_var calls.
#[test]
fn test_config_env_overrides_and_defaults() {
    unsafe {
        std::env::remove_var("HTTP_LISTEN");
        std::env::remove_var("DNS_LISTEN");
        std::env::remove_var("SERIAL_DEV");
        std::env::remove_var("STATIC_PATH");
        std::env::remove_var("ERR_LOG");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.http_listen, "0.0.0.0:80".parse().unwrap());
    assert_eq!(cfg.dns_listen, "0.0.0.0:53".parse().unwrap());
    assert_eq!(cfg.serial_dev.to_str(), Some("/dev/ttyS0"));
    assert_eq!(cfg.static_path.to_str(), Some("index.html"));
    assert_eq!(cfg.err_log_path.to_str(), Some("err.log"));

    unsafe {
        std::env::set_var("HTTP_LISTEN", "127.0.0.1:8080");
        std::env::set_var("SERIAL_DEV", "/dev/ttyUSB0");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.http_listen, "127.0.0.1:8080".parse().unwrap());
    assert_eq!(cfg.serial_dev.to_str(), Some("/dev/ttyUSB0"));

    unsafe {
        std::env::set_var("HTTP_LISTEN", "not-an-address");
    }
    assert!(Config::load().is_err());

    unsafe {
        std::env::remove_var("HTTP_LISTEN");
        std::env::remove_var("SERIAL_DEV");
    }
}

#[test]
fn test_config_is_cloneable() {
    let cfg = Config {
        http_listen: "127.0.0.1:8080".parse().unwrap(),
        dns_listen: "127.0.0.1:5353".parse().unwrap(),
        serial_dev: "/dev/ttyS0".into(),
        static_path: "index.html".into(),
        err_log_path: "err.log".into(),
    };
    let copy = cfg.clone();
    assert_eq!(copy.http_listen, cfg.http_listen);
    assert_eq!(copy.err_log_path, cfg.err_log_path);
}
