use std::path::PathBuf;

use crate::decision::Pipeline;
use crate::mail::{Address, MailSettings};

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without one the workflow runs in memory.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub context_name: String,
    pub mail_from: Address,
    pub pipeline: Pipeline,
    pub templates_dir: Option<PathBuf>,
    pub review_response_days: i64,
    pub review_due_days: i64,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// `"Name <email>"` or a bare address.
fn parse_address(value: &str, default_name: &str) -> Address {
    match value.split_once('<') {
        Some((name, rest)) => Address {
            name: name.trim().trim_matches('"').to_string(),
            email: rest.trim_end_matches('>').trim().to_string(),
        },
        None => Address {
            name: default_name.to_string(),
            email: value.trim().to_string(),
        },
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = var("PORT")
            .unwrap_or_else(|| "5001".to_string())
            .parse()
            .map_err(|_| "PORT must be a port number")?;

        let context_name = var("CONTEXT_NAME").unwrap_or_else(|| "Editorial Workflow".to_string());
        let mail_from = var("MAIL_FROM")
            .map(|v| parse_address(&v, &context_name))
            .unwrap_or_else(|| Address {
                name: context_name.clone(),
                email: "editors@localhost".to_string(),
            });
        if !mail_from.email.contains('@') {
            return Err(format!("MAIL_FROM is not an email address: {}", mail_from.email).into());
        }

        let pipeline = Pipeline {
            internal_review: var("INTERNAL_REVIEW_ENABLED").is_some_and(|v| parse_bool(&v)),
        };

        let review_response_days: i64 = match var("REVIEW_RESPONSE_DAYS") {
            Some(v) => v.parse().map_err(|_| "REVIEW_RESPONSE_DAYS must be a number of days")?,
            None => 7,
        };
        let review_due_days: i64 = match var("REVIEW_DUE_DAYS") {
            Some(v) => v.parse().map_err(|_| "REVIEW_DUE_DAYS must be a number of days")?,
            None => 28,
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            host,
            port,
            context_name,
            mail_from,
            pipeline,
            templates_dir: var("TEMPLATES_DIR").map(PathBuf::from),
            review_response_days,
            review_due_days,
        })
    }

    pub fn mail_settings(&self) -> MailSettings {
        MailSettings {
            context_name: self.context_name.clone(),
            from: self.mail_from.clone(),
        }
    }
}
