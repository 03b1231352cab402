pub use config::Config;
pub use once_cell::sync::OnceCell;
use std::error::Error;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init_global_config() -> Result<(), Box<dyn Error>> {
    let config = Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .add_source(config::Environment::with_prefix("DOGINALS").separator("_"))
        .build()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Load config for standalone binaries/utilities
pub fn load_config() -> Result<Config, Box<dyn Error>> {
    Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .build()
        .map_err(|e| Box::new(e) as Box<dyn Error>)
}

/// Node RPC endpoint settings: (url, user, pass)
pub fn get_rpc_settings(config: &Config) -> Result<(String, String, String), Box<dyn Error>> {
    let url = config
        .get_string("rpc.url")
        .map_err(|e| format!("Missing rpc.url in config: {}", e))?;
    let user = config
        .get_string("rpc.user")
        .map_err(|e| format!("Missing rpc.user in config: {}", e))?;
    let pass = config
        .get_string("rpc.pass")
        .map_err(|e| format!("Missing rpc.pass in config: {}", e))?;
    Ok((url, user, pass))
}

/// Get content_dir from config
pub fn get_content_dir(config: &Config) -> Result<String, Box<dyn Error>> {
    config
        .get_string("paths.content_dir")
        .map_err(|e| format!("Missing paths.content_dir in config: {}", e).into())
}

/// Get wallet_dir from config
pub fn get_wallet_dir(config: &Config) -> Result<String, Box<dyn Error>> {
    config
        .get_string("paths.wallet_dir")
        .map_err(|e| format!("Missing paths.wallet_dir in config: {}", e).into())
}

/// Get json_dir (per-run mint records) from config
pub fn get_json_dir(config: &Config) -> Result<String, Box<dyn Error>> {
    config
        .get_string("paths.json_dir")
        .map_err(|e| format!("Missing paths.json_dir in config: {}", e).into())
}

/// Fee rate override in satoshis per kB; falls back to the protocol default.
pub fn get_fee_per_kb(config: &Config) -> u64 {
    config
        .get_int("fees.per_kb")
        .map(|v| v as u64)
        .unwrap_or(crate::builder::DEFAULT_FEE_PER_KB)
}

/// Network selector: true = testnet address/WIF prefixes.
pub fn is_testnet(config: &Config) -> bool {
    config.get_bool("network.testnet").unwrap_or(false)
}
