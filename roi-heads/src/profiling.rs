//! Phase timing of the loss computation and the head pipeline.
//!
//! The timers compile to nothing unless the `profiling` feature is enabled.
//! The `ROI_HEADS_PROFILING_WHITELIST` variable restricts the reports to the
//! named timers.

use crate::common::*;

#[cfg(feature = "profiling")]
lazy_static! {
    static ref PROFILING_CONFIG: ProfilingConfig = {
        match envy::prefixed("ROI_HEADS_").from_env() {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "unable to read profiling variables, fall back to defaults: {:?}",
                    err
                );
                ProfilingConfig::default()
            }
        }
    };
    static ref REGISTERED_TIMINGS: dashmap::DashSet<&'static str> = dashmap::DashSet::new();
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingConfig {
    pub profiling_whitelist: Option<HashSet<String>>,
}

impl ProfilingConfig {
    pub fn allows(&self, name: &str) -> bool {
        self.profiling_whitelist
            .as_ref()
            .map(|whitelist| whitelist.contains(name))
            .unwrap_or(true)
    }
}

#[cfg(feature = "profiling")]
#[derive(Debug)]
pub struct Timing {
    name: &'static str,
    instant: Instant,
    elapsed: Vec<(&'static str, Duration)>,
}

#[cfg(not(feature = "profiling"))]
#[derive(Debug)]
pub struct Timing;

impl Timing {
    pub fn new(name: &'static str) -> Self {
        #[cfg(feature = "profiling")]
        {
            if REGISTERED_TIMINGS.insert(name) {
                info!("registered timing profile '{}'", name);
            }

            Self {
                name,
                instant: Instant::now(),
                elapsed: vec![],
            }
        }

        #[cfg(not(feature = "profiling"))]
        {
            let _ = name;
            Self
        }
    }

    /// Close the current phase under `name` and start the next one.
    pub fn set_record(&mut self, name: &'static str) {
        #[cfg(feature = "profiling")]
        {
            self.elapsed.push((name, self.instant.elapsed()));
            self.instant = Instant::now();
        }

        #[cfg(not(feature = "profiling"))]
        let _ = name;
    }

    pub fn report(&self) {
        #[cfg(feature = "profiling")]
        {
            if PROFILING_CONFIG.allows(self.name) {
                info!("profiling report for '{}'", self.name);
                self.elapsed.iter().for_each(|(name, elapsed)| {
                    info!("- {}\t{:?}", name, elapsed);
                });
            }
        }
    }
}
