use crate::config::ConfigDoc;
use crate::error::{Error, ErrorKind, Result};
use crate::modules::Module;
use crate::planner::{Phase, Plan, Task};

const SUPPORTED_TABLES: &[&str] = &["build", "image"];

pub struct CoreModule;

impl Module for CoreModule {
    fn id(&self) -> &'static str {
        "core"
    }

    fn detect(&self, _doc: &ConfigDoc) -> bool {
        true
    }

    fn plan(&self, doc: &ConfigDoc, plan: &mut Plan) -> Result<()> {
        for table in doc.top_level_tables() {
            if !SUPPORTED_TABLES.contains(&table) {
                return Err(Error::new(
                    ErrorKind::Config,
                    format!(
                        "config table '{table}' is not supported in this schema; use build (metadata) and image"
                    ),
                ));
            }
        }

        plan.add(Task {
            id: "core.init".into(),
            label: "Init".into(),
            module: self.id().into(),
            phase: Phase::Init,
            after: vec![],
        })
    }
}
