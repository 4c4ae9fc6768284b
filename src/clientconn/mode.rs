//! Operating modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Per-connection routing policy. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Serve locally only.
    #[default]
    Direct,
    /// Forward to the upstream only.
    Proxy,
    /// Run both, send the local response, log differences.
    DiffDirect,
    /// Run both, send the upstream response, log differences.
    DiffProxy,
}

/// Which response is written back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Proxy,
}

/// What a mode does with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub proxy: bool,
    pub local: bool,
    pub diff: bool,
    pub send: Source,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Direct, Mode::Proxy, Mode::DiffDirect, Mode::DiffProxy];

    pub const fn plan(self) -> Plan {
        match self {
            Mode::Direct => Plan {
                proxy: false,
                local: true,
                diff: false,
                send: Source::Local,
            },
            Mode::Proxy => Plan {
                proxy: true,
                local: false,
                diff: false,
                send: Source::Proxy,
            },
            Mode::DiffDirect => Plan {
                proxy: true,
                local: true,
                diff: true,
                send: Source::Local,
            },
            Mode::DiffProxy => Plan {
                proxy: true,
                local: true,
                diff: true,
                send: Source::Proxy,
            },
        }
    }

    /// True for every mode that needs an upstream.
    pub const fn uses_proxy(self) -> bool {
        self.plan().proxy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Direct => "direct",
            Mode::Proxy => "proxy",
            Mode::DiffDirect => "diff-direct",
            Mode::DiffProxy => "diff-proxy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown mode {:?}, expected one of: direct, proxy, diff-direct, diff-proxy", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_sends_what_it_produces() {
        for mode in Mode::ALL {
            let plan = mode.plan();
            match plan.send {
                Source::Local => assert!(plan.local, "{} sends local without running it", mode),
                Source::Proxy => assert!(plan.proxy, "{} sends proxy without running it", mode),
            }
            // Comparing needs both sides.
            assert_eq!(plan.diff, plan.local && plan.proxy);
        }
    }

    #[test]
    fn test_parse() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert!("normal".parse::<Mode>().is_err());
    }
}
