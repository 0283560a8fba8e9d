//! Runtime environment required by the supervised application

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TmsError};

pub const NODE_ENV: &str = "NODE_ENV";
pub const PORT: &str = "PORT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    Production,
    Staging,
    Development,
    Test,
}

impl NodeEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeEnv::Production => "production",
            NodeEnv::Staging => "staging",
            NodeEnv::Development => "development",
            NodeEnv::Test => "test",
        }
    }
}

impl fmt::Display for NodeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeEnv {
    type Err = TmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" => Ok(NodeEnv::Production),
            "staging" => Ok(NodeEnv::Staging),
            "development" => Ok(NodeEnv::Development),
            "test" => Ok(NodeEnv::Test),
            other => Err(TmsError::InvalidEnv {
                name: NODE_ENV.to_string(),
                message: format!(
                    "'{}' is not one of production, staging, development, test",
                    other
                ),
            }),
        }
    }
}

/// `NODE_ENV` and `PORT` as validated before the application starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeEnv {
    pub node_env: NodeEnv,
    pub port: u16,
}

impl RuntimeEnv {
    /// Reads the process environment after loading `.env`, if any.
    pub fn from_process_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let node_env = required(&lookup, NODE_ENV)?.parse::<NodeEnv>()?;
        let port = port_from_lookup(&lookup)?;
        Ok(Self { node_env, port })
    }

    /// Variables exported to the child process.
    pub fn as_vars(&self) -> [(&'static str, String); 2] {
        [
            (NODE_ENV, self.node_env.to_string()),
            (PORT, self.port.to_string()),
        ]
    }
}

/// `PORT` on its own, for callers that only need to reach the application.
pub fn port_from_lookup<F>(lookup: &F) -> Result<u16>
where
    F: Fn(&str) -> Option<String>,
{
    parse_port(&required(lookup, PORT)?)
}

fn required<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(TmsError::MissingEnv(name.to_string())),
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    let invalid = |message: String| TmsError::InvalidEnv {
        name: PORT.to_string(),
        message,
    };
    let port: u32 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(format!("'{}' is not a number", raw)))?;
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid(format!("{} is outside 1-65535", port))),
    }
}
