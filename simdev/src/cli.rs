use std::net::SocketAddr;

use clap::Parser;
use serde_json::{Map, Value};

use crate::state::models::Interval;
use crate::util::types::{ConnectionString, DeviceId};

fn parse_desired(s: &str) -> Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_str(s)
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Device connection string, eg. "HostName=<hub>;DeviceId=<id>;SharedAccessKey=<key>"
    #[arg(
        env = "SIMDEV_CONNECTION_STRING",
        value_name = "connection-string",
        hide_env_values = true
    )]
    pub connection_string: ConnectionString,

    /// Identifier sent with every telemetry message
    #[arg(
        env = "SIMDEV_DEVICE_ID",
        long = "device-id",
        value_name = "id",
        default_value_t = DeviceId::default()
    )]
    pub device_id: DeviceId,

    /// Telemetry interval in milliseconds until the twin says otherwise
    #[arg(
        env = "SIMDEV_INTERVAL_MS",
        long = "interval-ms",
        value_name = "ms",
        default_value = "3000"
    )]
    pub interval: Interval,

    /// Seed for the simulated sensor readings
    #[arg(env = "SIMDEV_SEED", long = "seed", value_name = "int")]
    pub seed: Option<u64>,

    /// Initial desired properties of the twin as a JSON object
    #[arg(
        env = "SIMDEV_DESIRED",
        long = "desired",
        value_name = "json",
        value_parser = parse_desired
    )]
    pub desired: Option<Map<String, Value>>,

    /// Local API listen address. The API is only started if set
    #[arg(
        env = "SIMDEV_LOCAL_API_ADDRESS",
        long = "local-api-address",
        value_name = "addr"
    )]
    pub local_api_address: Option<SocketAddr>,
}

pub fn parse() -> Cli {
    Parser::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn it_validates_the_command() {
        Cli::command().debug_assert();
    }

    #[test]
    fn it_requires_a_connection_string() {
        assert!(Cli::try_parse_from(["simdev"]).is_err());
        assert!(Cli::try_parse_from(["simdev", "HostName=hub"]).is_err());
    }

    #[test]
    fn it_uses_defaults() {
        let cli = Cli::try_parse_from(["simdev", "HostName=hub;DeviceId=dev0"]).unwrap();

        assert_eq!(cli.connection_string.device_id, "dev0");
        assert_eq!(cli.device_id, DeviceId::default());
        assert_eq!(cli.interval, Interval::default());
        assert_eq!(cli.seed, None);
        assert_eq!(cli.desired, None);
        assert_eq!(cli.local_api_address, None);
    }

    #[test]
    fn it_parses_all_arguments() {
        let cli = Cli::try_parse_from([
            "simdev",
            "HostName=hub;DeviceId=dev0;SharedAccessKey=a2V5",
            "--device-id",
            "sim7",
            "--interval-ms",
            "500",
            "--seed",
            "9",
            "--desired",
            r#"{"Interval": "1000"}"#,
            "--local-api-address",
            "127.0.0.1:9000",
        ])
        .unwrap();

        assert_eq!(cli.device_id, DeviceId::from("sim7"));
        assert_eq!(cli.interval.as_millis(), 500);
        assert_eq!(cli.seed, Some(9));
        assert_eq!(
            cli.desired.map(Value::Object),
            Some(json!({"Interval": "1000"}))
        );
        assert_eq!(
            cli.local_api_address,
            Some("127.0.0.1:9000".parse().unwrap())
        );
    }

    #[test]
    fn it_rejects_a_zero_interval() {
        assert!(
            Cli::try_parse_from(["simdev", "HostName=hub;DeviceId=dev0", "--interval-ms", "0"])
                .is_err()
        );
    }
}
