use std::str::FromStr as _;

use rstest::*;
use soberdev_backend::config::dto::*;
use tap::prelude::*;
use uuid::Uuid;

struct Sample {
    json_repr: &'static str,
    file_conf: ConfFile,
}

fn sample_1() -> Sample {
    Sample {
        json_repr: r#"{
            "Id": "123e4567-e89b-12d3-a456-426614174000",
            "Hostname": "directory.example.io",
            "ProvisionerPublicKeyFile": "/path/to/provisioner.pub.key",
            "ProvisionerPrivateKeyData": {
                "Value": "provisioner-key-value"
            },
            "Listeners": [
                {
                    "InternalUrl": "http://*:8080",
                    "ExternalUrl": "http://*:8080"
                }
            ],
            "Database": "/var/lib/backend/users.sqlite3",
            "AccessTokenLifetime": 600,
            "RefreshTokenLifetime": 172800,
            "LogDirective": "info,soberdev_backend=trace"
        }"#,
        file_conf: ConfFile {
            id: Some(Uuid::from_str("123e4567-e89b-12d3-a456-426614174000").expect("valid UUID")),
            hostname: Some("directory.example.io".to_owned()),
            provisioner_public_key: Some(ConfFileOrData::Path {
                file: "/path/to/provisioner.pub.key".into(),
            }),
            provisioner_private_key: Some(ConfFileOrData::Inlined {
                data: ConfData {
                    value: "provisioner-key-value".to_owned(),
                    format: PrivKeyFormat::Pkcs8,
                    encoding: DataEncoding::Multibase,
                },
            }),
            listeners: vec![ListenerConf {
                internal_url: "http://*:8080".try_into().expect("valid URL"),
                external_url: "http://*:8080".try_into().expect("valid URL"),
            }],
            database: Some("/var/lib/backend/users.sqlite3".into()),
            access_token_lifetime: Some(600),
            refresh_token_lifetime: Some(172_800),
            login_rate_limit: None,
            verbosity_profile: None,
            log_file: None,
            log_directive: Some("info,soberdev_backend=trace".to_owned()),
            debug: None,
        },
    }
}

fn sample_2() -> Sample {
    Sample {
        json_repr: r#"{
            "ProvisionerPublicKeyData": {
                "Format": "Rsa",
                "Encoding": "Base64Pad",
                "Value": "public-key-value"
            },
            "Listeners": [],
            "LoginRateLimit": 5,
            "VerbosityProfile": "Debug",
            "LogFile": "/path/to/log/file"
        }"#,
        file_conf: ConfFile {
            id: None,
            hostname: None,
            provisioner_public_key: Some(ConfFileOrData::Inlined {
                data: ConfData {
                    value: "public-key-value".to_owned(),
                    format: PubKeyFormat::Rsa,
                    encoding: DataEncoding::Base64Pad,
                },
            }),
            provisioner_private_key: None,
            listeners: vec![],
            database: None,
            access_token_lifetime: None,
            refresh_token_lifetime: None,
            login_rate_limit: Some(5),
            verbosity_profile: Some(VerbosityProfile::Debug),
            log_file: Some("/path/to/log/file".into()),
            log_directive: None,
            debug: None,
        },
    }
}

#[rstest]
#[case(sample_1())]
#[case(sample_2())]
fn sample_parsing(#[case] sample: Sample) {
    let from_json = serde_json::from_str::<ConfFile>(sample.json_repr)
        .expect("parseable sample")
        .pipe_ref(serde_json::to_value)
        .expect("serializable sample");

    let from_struct = serde_json::to_value(&sample.file_conf).expect("serializable conf");

    assert_eq!(from_json, from_struct);
}

mod runtime_validation {
    use super::*;

    const PUBLIC_KEY: &str = "mMIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA4vuqLOkl1pWobt6su1XO9VskgCAwevEGs6kkNjJQBwkGnPKYLmNF1E/af1yCocfVn/OnPf9e4x+lXVyZ6LMDJxFxu+axdgOq3Ld392J1iAEbfvwlyRFnEXFOJNyylqg3bY6LvnWHL/XZczVdMD9xYfq2sO9bg3xjRW4s7r9EEYOFjqVT3VFznH9iWJVtcSEKukmS/3uKoO6lGhacvu0HhjXXdgq0R8zvR4XRJ9Fcnf0f9Ypoc+i6L80NVjrRCeVOH+Ld/2fA9bocpfLarcVqG3RjS+qgOtpyCc0jWVFF4zaGQ7LUDFkEIYILkICeMMn2ll29hmZNzsJzZJ9s6NocgQIDAQAB";

    fn valid_conf_file() -> ConfFile {
        serde_json::from_str(&format!(
            r#"{{
                "ProvisionerPublicKeyData": {{ "Value": "{PUBLIC_KEY}" }},
                "Listeners": [
                    {{ "InternalUrl": "http://*:8080", "ExternalUrl": "http://*:8080" }}
                ]
            }}"#
        ))
        .expect("parseable config")
    }

    #[test]
    fn minimal_config_is_accepted() {
        let conf = soberdev_backend::config::Conf::from_conf_file(&valid_conf_file()).expect("valid configuration");

        assert_eq!(conf.access_token_lifetime.as_secs(), 300);
        assert_eq!(conf.refresh_token_lifetime.as_secs(), 86_400);
        assert_eq!(conf.login_rate_limit, 10);
        assert!(conf.provisioner_private_key.is_none());
    }

    #[test]
    fn listeners_are_required() {
        let mut conf_file = valid_conf_file();
        conf_file.listeners.clear();

        soberdev_backend::config::Conf::from_conf_file(&conf_file).expect_err("no listener");
    }

    #[test]
    fn https_listeners_are_rejected() {
        let mut conf_file = valid_conf_file();
        conf_file.listeners[0].internal_url = "https://*:8443".try_into().expect("valid URL");

        soberdev_backend::config::Conf::from_conf_file(&conf_file).expect_err("https listener");
    }

    #[test]
    fn refresh_lifetime_must_exceed_access_lifetime() {
        let mut conf_file = valid_conf_file();
        conf_file.access_token_lifetime = Some(3600);
        conf_file.refresh_token_lifetime = Some(3600);

        soberdev_backend::config::Conf::from_conf_file(&conf_file).expect_err("refresh <= access");
    }
}
