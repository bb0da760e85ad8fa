use island_shared::config::WorldConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory holding `profiles.json` and `accounts.json`
    pub data_dir: PathBuf,
    /// Browser client assets served at `/` when set
    pub static_dir: Option<PathBuf>,
    /// Minimum gap between accepted moves per connection
    pub move_rate_ms: u64,
    pub profile_save_debounce_ms: u64,
    pub account_save_debounce_ms: u64,
    /// Sweep that copies every live session into its profile
    pub autosave_interval_ms: u64,
    pub chat_max_len: usize,
    pub name_max_len: usize,
    pub max_connections: usize,
    /// Frames above this size close the connection
    pub max_message_bytes: usize,
    /// Undecodable frames tolerated before the connection is closed
    pub max_parse_errors: u32,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    /// scrypt cost parameter (N = 2^log_n)
    pub scrypt_log_n: u8,
    /// Seed for spawn points and starter colours; entropy when unset
    pub rng_seed: Option<u64>,
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            data_dir: PathBuf::from("data"),
            static_dir: None,
            move_rate_ms: 50,
            profile_save_debounce_ms: 2_000,
            account_save_debounce_ms: 2_000,
            autosave_interval_ms: 30_000,
            chat_max_len: 220,
            name_max_len: 18,
            max_connections: 500,
            max_message_bytes: 16 * 1024,
            max_parse_errors: 5,
            ping_interval_ms: 10_000,
            ping_timeout_ms: 5_000,
            scrypt_log_n: 14,
            rng_seed: None,
            world: WorldConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if self.autosave_interval_ms == 0 {
            return Err("autosave_interval_ms must be > 0".to_string());
        }
        if self.ping_interval_ms == 0 {
            return Err("ping_interval_ms must be > 0".to_string());
        }
        if self.chat_max_len == 0 || self.name_max_len == 0 {
            return Err("chat_max_len and name_max_len must be > 0".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.max_message_bytes < 256 {
            return Err("max_message_bytes must be >= 256".to_string());
        }
        if self.scrypt_log_n == 0 || self.scrypt_log_n >= 32 {
            return Err("scrypt_log_n must be in 1..32".to_string());
        }
        self.world.validate()
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.data_dir.join("profiles.json")
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }

    pub fn move_rate(&self) -> Duration {
        Duration::from_millis(self.move_rate_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Silence after which a connection counts as gone
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms + self.ping_timeout_ms)
    }
}
