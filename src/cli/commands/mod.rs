use clap::{
    Arg, ColorChoice, Command,
    builder::{
        ValueParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

pub const ARG_VERBOSITY: &str = "verbosity";

fn parse_log_level(level: &str) -> std::result::Result<u8, String> {
    if let Ok(parsed) = level.parse::<u8>() {
        // Successfully parsed as a number
        if parsed <= 5 {
            return Ok(parsed);
        }
    }

    match level.to_lowercase().as_str() {
        "error" => Ok(0),
        "warn" => Ok(1),
        "info" => Ok(2),
        "debug" => Ok(3),
        "trace" => Ok(4),
        _ => Err("invalid log level".to_string()),
    }
}

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| parse_log_level(level))
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("fidinda")
        .about("Trusted device registration and authentication")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("FIDINDA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("FIDINDA_DSN")
                .required(true),
        )
        .arg(
            Arg::new("client-id")
                .long("client-id")
                .help("OAuth client id allowed to use the device grants")
                .env("FIDINDA_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new("client-secret")
                .long("client-secret")
                .help("OAuth client secret for the token endpoint")
                .env("FIDINDA_CLIENT_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("trust-delay")
                .long("trust-delay")
                .help("Seconds a freshly registered device stays pending before it can authenticate")
                .default_value("0")
                .env("FIDINDA_TRUST_DELAY")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("max-devices")
                .long("max-devices")
                .help("Maximum number of registered devices per user")
                .default_value("5")
                .env("FIDINDA_MAX_DEVICES")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("otp-validity")
                .long("otp-validity")
                .help("One-time code validity window in seconds")
                .default_value("120")
                .env("FIDINDA_OTP_VALIDITY")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("token-ttl")
                .long("token-ttl")
                .help("Access token lifetime in seconds")
                .default_value("3600")
                .env("FIDINDA_TOKEN_TTL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("environment")
                .long("environment")
                .help("Deployment environment name (developer code is refused in production)")
                .default_value("production")
                .env("FIDINDA_ENVIRONMENT"),
        )
        .arg(
            Arg::new("developer-code")
                .long("developer-code")
                .help("Fixed one-time code accepted instead of a delivered OTP (non-production only)")
                .env("FIDINDA_DEVELOPER_CODE"),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("FIDINDA_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "fidinda");
        assert_eq!(
            command.get_about().map(ToString::to_string).as_deref(),
            Some("Trusted device registration and authentication")
        );
        assert_eq!(
            command.get_version(),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_defaults() {
        let command = new();
        let matches = command.get_matches_from(vec![
            "fidinda",
            "--dsn",
            "postgres://localhost/fidinda",
            "--client-id",
            "mobile-app",
            "--client-secret",
            "s3cret",
        ]);

        assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
        assert_eq!(matches.get_one::<u64>("trust-delay").copied(), Some(0));
        assert_eq!(matches.get_one::<u32>("max-devices").copied(), Some(5));
        assert_eq!(matches.get_one::<u64>("otp-validity").copied(), Some(120));
        assert_eq!(matches.get_one::<u64>("token-ttl").copied(), Some(3600));
        assert_eq!(
            matches.get_one::<String>("environment").map(String::as_str),
            Some("production")
        );
        assert!(matches.get_one::<String>("developer-code").is_none());
    }

    #[test]
    fn test_log_level_parsing() {
        for (input, expected) in [
            ("error", 0u8),
            ("warn", 1),
            ("info", 2),
            ("debug", 3),
            ("trace", 4),
            ("3", 3),
        ] {
            assert_eq!(parse_log_level(input), Ok(expected), "input: {input}");
        }
        assert!(parse_log_level("nope").is_err());
        assert!(parse_log_level("9").is_err());
    }

    #[test]
    fn test_verbosity_flag_count() {
        let matches = new()
            .try_get_matches_from([
                "fidinda",
                "--dsn",
                "postgres://localhost/fidinda",
                "--client-id",
                "mobile-app",
                "--client-secret",
                "s3cret",
                "-vvv",
            ])
            .expect("matches");
        assert_eq!(matches.get_count(ARG_VERBOSITY), 3);
    }
}
