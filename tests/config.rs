use imgquery::config::{parse_services, AppConfig, ConfigError, ServiceConfig};

#[test]
fn parses_service_list() {
    let services = parse_services("0:danbooru, 3:konachan,").unwrap();
    assert_eq!(services, vec![
        ServiceConfig { id: 0, name: "danbooru".into() },
        ServiceConfig { id: 3, name: "konachan".into() },
    ]);

    assert_eq!(parse_services("danbooru"), Err(ConfigError::InvalidService("danbooru".into())));
    assert_eq!(parse_services("x:danbooru"), Err(ConfigError::InvalidService("x:danbooru".into())));
    assert_eq!(parse_services("1:"), Err(ConfigError::InvalidService("1:".into())));
}

#[test]
fn defaults_are_valid() {
    assert_eq!(AppConfig::default().validate(), Ok(()));
}

#[test]
fn rejects_bad_limits() {
    let mut cfg = AppConfig::default();
    cfg.services.clear();
    assert_eq!(cfg.validate(), Err(ConfigError::NoServices));

    let mut cfg = AppConfig::default();
    cfg.services = parse_services("1:a,1:b").unwrap();
    assert_eq!(cfg.validate(), Err(ConfigError::DuplicateService(1)));

    let mut cfg = AppConfig::default();
    cfg.fetch.limits.max_dim = 0;
    assert_eq!(cfg.validate(), Err(ConfigError::InvalidMaxDim));

    let mut cfg = AppConfig::default();
    cfg.fetch.limits.check_interval = 0;
    assert_eq!(cfg.validate(), Err(ConfigError::InvalidCheckInterval));
}

#[test]
fn resolves_services_by_id_or_name() {
    let mut cfg = AppConfig::default();
    cfg.services = parse_services("0:danbooru,3:konachan").unwrap();
    assert_eq!(cfg.service("3").map(|s| s.name.as_str()), Some("konachan"));
    assert_eq!(cfg.service("Danbooru").map(|s| s.id), Some(0));
    assert!(cfg.service("7").is_none());
    assert!(cfg.service("gelbooru").is_none());
}
