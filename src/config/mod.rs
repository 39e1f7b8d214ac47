mod file_config;

pub use file_config::{FileConfig, RecommendationConfig};

use crate::knowledge_base::NameMatching;
use crate::recommend::CandidateOrder;
use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_READ_POOL_SIZE: usize = 4;
pub const DEFAULT_MAX_HOPS: usize = 1;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub read_pool_size: usize,
    pub name_matching: NameMatching,
    pub candidate_order: CandidateOrder,
    pub max_hops: usize,
    pub rng_seed: Option<u64>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            name_matching: NameMatching::default(),
            candidate_order: CandidateOrder::default(),
            max_hops: DEFAULT_MAX_HOPS,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub read_pool_size: usize,
    pub name_matching: NameMatching,
    pub candidate_order: CandidateOrder,
    pub max_hops: usize,
    /// Fixed seed for the engine's random picks; OS entropy when absent.
    pub rng_seed: Option<u64>,
}

fn parse_setting<T: FromStr<Err = String>>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|e: String| anyhow!("Invalid value for {}: {}", key, e))
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| anyhow!("db_path must be specified via --db or in config file"))?;

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }
        if db_path.is_dir() {
            bail!("db_path is a directory: {:?}", db_path);
        }

        let read_pool_size = file.read_pool_size.unwrap_or(cli.read_pool_size);
        if read_pool_size == 0 {
            bail!("read_pool_size must be at least 1");
        }

        let name_matching = match file.name_matching {
            Some(s) => parse_setting("name_matching", &s)?,
            None => cli.name_matching,
        };

        let rec = file.recommendation.unwrap_or_default();
        let candidate_order = match rec.candidate_order {
            Some(s) => parse_setting("candidate_order", &s)?,
            None => cli.candidate_order,
        };
        let max_hops = rec.max_hops.unwrap_or(cli.max_hops);
        let rng_seed = rec.rng_seed.or(cli.rng_seed);

        Ok(Self {
            db_path,
            read_pool_size,
            name_matching,
            candidate_order,
            max_hops,
            rng_seed,
        })
    }

    pub fn rng(&self) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}
