use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use super::error::HandlerErr;
use crate::calc::GradingConfig;
use crate::setup;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn conn(&self) -> Result<&Connection, HandlerErr> {
        self.db
            .as_ref()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
    }

    /// Grading settings of the open workspace, or the defaults when none is
    /// open.
    pub fn grading_config(&self) -> Result<GradingConfig, HandlerErr> {
        match self.db.as_ref() {
            Some(conn) => Ok(setup::load_grading_config(conn)?),
            None => Ok(GradingConfig::default()),
        }
    }
}
