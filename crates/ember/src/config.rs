use std::path::PathBuf;

use clap::{builder::RangedU64ValueParser, Parser};
use graphics::{GraphicsConfig, PowerPreference, DEFAULT_PARTICLE_CAPACITY};

use crate::logging::LoggingConfig;

#[derive(Debug, Parser)]
#[command(name = "ember")]
#[command(about = "A textured plane drawn as a burst of fading particles", long_about = None)]
#[command(version)]
pub struct Args {
    /// Directory holding plane.obj and its textures.
    #[arg(long, default_value = "resources")]
    pub resources: PathBuf,

    /// Size of the particle pool. Must be at least 1.
    #[arg(
        long,
        default_value_t = DEFAULT_PARTICLE_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub particles: usize,

    /// Seed for particle spawning. Drawn from the OS when omitted.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Force the graphics debug layer on.
    #[arg(long, conflicts_with = "no_debug")]
    pub debug: bool,

    /// Force the graphics debug layer off.
    #[arg(long)]
    pub no_debug: bool,

    /// Prefer the high-performance adapter on multi-GPU systems.
    #[arg(long)]
    pub high_performance: bool,

    /// Log filter, in `RUST_LOG` syntax.
    #[arg(long)]
    pub log: Option<String>,
}

impl Args {
    pub fn graphics(&self) -> GraphicsConfig {
        let debug_mode = match (self.debug, self.no_debug) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };

        GraphicsConfig {
            power_preference: if self.high_performance {
                PowerPreference::HiPower
            } else {
                PowerPreference::DontCare
            },
            debug_mode,
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            env_filter: self.log.clone(),
            ..LoggingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["ember"]);

        assert_eq!(args.resources, PathBuf::from("resources"));
        assert_eq!(args.particles, 10);
        assert_eq!(args.seed, None);
        assert_eq!(args.graphics(), GraphicsConfig::default());
        assert!(args.logging().env_filter.is_none());
    }

    #[test]
    fn debug_layer_can_be_forced_either_way() {
        let on = Args::parse_from(["ember", "--debug"]);
        assert_eq!(on.graphics().debug_mode, Some(true));

        let off = Args::parse_from(["ember", "--no-debug"]);
        assert_eq!(off.graphics().debug_mode, Some(false));

        assert!(Args::try_parse_from(["ember", "--debug", "--no-debug"]).is_err());
    }

    #[test]
    fn particle_pool_cannot_be_empty() {
        assert!(Args::try_parse_from(["ember", "--particles", "0"]).is_err());
        assert_eq!(Args::parse_from(["ember", "--particles", "1"]).particles, 1);
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from([
            "ember",
            "--resources",
            "assets/scene",
            "--particles",
            "64",
            "--seed",
            "42",
            "--high-performance",
            "--log",
            "graphics=trace",
        ]);

        assert_eq!(args.resources, PathBuf::from("assets/scene"));
        assert_eq!(args.particles, 64);
        assert_eq!(args.seed, Some(42));
        assert_eq!(args.graphics().power_preference, PowerPreference::HiPower);
        assert_eq!(args.logging().env_filter.as_deref(), Some("graphics=trace"));
    }
}
