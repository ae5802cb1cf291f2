//! `config_contract` 集成测试：TOML 配置解析与校验。

use spark_dataplane::{ConnectionMetaData, DataplaneConfig, EndpointId, codes};

#[test]
fn empty_document_yields_defaults() {
    let config = DataplaneConfig::from_toml_str("").expect("defaults");
    assert_eq!(config, DataplaneConfig::default());
    assert_eq!(config.buffer.count, 2);
    assert_eq!(config.buffer.size, 4096);
    assert_eq!(config.template.max_period, 4096);
}

#[test]
fn partial_tables_override_selected_fields() {
    let config = DataplaneConfig::from_toml_str(
        r#"
        [buffer]
        count = 8
        size = 1500

        [poll]
        spin_attempts = 0
        "#,
    )
    .expect("parse");
    assert_eq!(config.buffer.count, 8);
    assert_eq!(config.buffer.size, 1500);
    assert_eq!(config.buffer.alignment, 16);
    assert_eq!(config.poll.spin_attempts, 0);
    assert_eq!(config.flags.full_value, 1);

    let rendered = config.to_toml_string().expect("render");
    assert_eq!(DataplaneConfig::from_toml_str(&rendered).expect("reparse"), config);
}

#[test]
fn unknown_fields_are_rejected() {
    let err = DataplaneConfig::from_toml_str("[buffer]\ncapacity = 3\n").expect_err("unknown");
    assert_eq!(err.code(), codes::CONFIG_PARSE);
}

#[test]
fn invalid_combinations_are_rejected() {
    for raw in [
        "[buffer]\ncount = 0\n",
        "[buffer]\nalignment = 12\n",
        "[buffer]\nalignment = 2\n",
        "[flags]\nfull_value = 0\n",
        "[template]\nmax_period = 0\n",
    ] {
        let err = DataplaneConfig::from_toml_str(raw).expect_err(raw);
        assert_eq!(err.code(), codes::INVALID_CONFIG, "{raw}");
    }
}

#[test]
fn config_supplies_local_buffer_geometry() {
    let config =
        DataplaneConfig::from_toml_str("[buffer]\ncount = 3\nsize = 256\n").expect("parse");
    let producer: EndpointId = "spark-shm:p;65536".parse().expect("endpoint");
    let consumer: EndpointId = "spark-shm:c;65536".parse().expect("endpoint");
    let meta = ConnectionMetaData::from_config(producer, consumer, &config).expect("metadata");
    assert_eq!(meta.producer().buffer_count(), 3);
    assert_eq!(meta.consumers()[0].buffer_size(), 256);
}
