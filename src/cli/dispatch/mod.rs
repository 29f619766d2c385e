use crate::api::handlers::device::DeviceAuthConfig;
use crate::cli::actions::Action;
use anyhow::{Result, anyhow};
use secrecy::SecretString;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let client_id = matches
        .get_one::<String>("client-id")
        .map(String::to_string)
        .ok_or_else(|| anyhow!("missing required argument: --client-id"))?;
    let client_secret = matches
        .get_one::<String>("client-secret")
        .map(|secret| SecretString::from(secret.clone()))
        .ok_or_else(|| anyhow!("missing required argument: --client-secret"))?;

    let mut config = DeviceAuthConfig::new(client_id, client_secret);

    if let Some(&seconds) = matches.get_one::<u64>("trust-delay") {
        config = config.with_trust_delay_seconds(seconds);
    }
    if let Some(&max) = matches.get_one::<u32>("max-devices") {
        config = config.with_max_devices(max);
    }
    if let Some(&seconds) = matches.get_one::<u64>("otp-validity") {
        config = config.with_otp_validity_seconds(seconds);
    }
    if let Some(&seconds) = matches.get_one::<u64>("token-ttl") {
        config = config.with_token_ttl_seconds(seconds);
    }
    if let Some(environment) = matches.get_one::<String>("environment") {
        config = config.with_environment(environment.clone());
    }
    if let Some(code) = matches.get_one::<String>("developer-code") {
        config = config.with_developer_code(code.clone());
    }

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow!("missing required argument: --dsn"))?,
        config,
    })
}
