use log::*;
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{self, prelude::*, SeekFrom},
    path::Path,
    time::Duration,
};
use voxel_util::Vector;

/// The main server configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The server IP, defaults to "127.0.0.1".
    pub server_ip: String,
    /// The server port, defaults to 25580.
    pub port: u16,
    /// The maximum number of players the server will allow, defaults to 20.
    pub max_players: u16,
    /// The name of the world players join.
    pub world_name: String,
    /// How many chunks around the player are streamed on the x and z axes.
    pub view_distance: u32,
    /// How many chunks above and below the player are streamed.
    pub vertical_view_distance: u32,
    /// How far a player may reach when acting on blocks.
    pub max_ray_distance: f64,
    pub keepalive_interval_ms: u64,
    /// How long a peer may take to answer a keepalive, and how long a connection may take to
    /// reach the playing phase.
    pub keepalive_timeout_ms: u64,
    /// How often the server restates each player's authoritative position.
    pub posview_interval_ms: u64,
    /// Moves farther than this from the last accepted position are snapped back.
    pub max_move_distance: f64,
    /// Frames at least this large are compressed. Negative values disable compression.
    pub compression_threshold: i32,
    pub tick_interval_ms: u64,
    /// Where players appear after logging in, as `[x, y, z]`.
    pub spawn: [f64; 3],
}

impl Config {
    #[inline]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    #[inline]
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }

    #[inline]
    pub fn posview_interval(&self) -> Duration {
        Duration::from_millis(self.posview_interval_ms)
    }

    #[inline]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    #[inline]
    pub fn spawn(&self) -> Vector<f64> {
        Vector::rect(self.spawn[0], self.spawn[1], self.spawn[2])
    }

    #[inline]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_ip, self.port)
    }
}

// Instantiate a config with default values
impl Default for Config {
    fn default() -> Self {
        Config {
            server_ip: "127.0.0.1".to_owned(),
            port: 25580,
            max_players: 20,
            world_name: "overworld".to_owned(),
            view_distance: 4,
            vertical_view_distance: 2,
            max_ray_distance: 8.0,
            keepalive_interval_ms: 10_000,
            keepalive_timeout_ms: 30_000,
            posview_interval_ms: 5_000,
            max_move_distance: 10.0,
            compression_threshold: 256,
            tick_interval_ms: 50,
            spawn: [0.5, 5.0, 0.5],
        }
    }
}

/// Loads the config at the given path. A missing file is created with the default configuration,
/// and a file that fails to parse is overwritten with it.
pub fn load_config<P: AsRef<Path>>(path: P) -> io::Result<Config> {
    let path = path.as_ref();

    if path.exists() {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut json = String::new();
        file.read_to_string(&mut json)?;

        match serde_json::from_str(&json) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Invalid config JSON: {}", e);
                use_default(&mut file)
            }
        }
    } else {
        info!("Config file not found, creating file");
        use_default(&mut File::create(path)?)
    }
}

fn use_default(file: &mut File) -> io::Result<Config> {
    info!("Using default configurations");

    let default = Config::default();
    let json = serde_json::to_string_pretty(&default)?;
    let bytes = json.as_bytes();

    // Go to the beginning of the file, write the default and reset the length
    file.seek(SeekFrom::Start(0))?;
    file.write_all(bytes)?;
    file.set_len(bytes.len() as u64)?;

    Ok(default)
}
