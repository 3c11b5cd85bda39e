use std::sync::Arc;

use serde::Deserialize;

use bootseed_macros::{Module, Task};

use crate::config::ConfigDoc;
use crate::executor::{ExecCtx, SharedSourceFactory};
use crate::image::{self, Options};
use crate::store::{HttpStoreFactory, StoreConfig};
use crate::{Error, ErrorKind, Result};

fn default_true() -> bool {
    true
}

fn default_channel() -> String {
    "stable".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub model_file: String,
    pub root_dir: String,
    pub gadget_unpack_dir: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Extra packages fetched before the model's gadget, core and kernel.
    pub packages: Vec<String>,
    pub local_dir: Option<String>,
    pub store: StoreConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_file: String::new(),
            root_dir: String::new(),
            gadget_unpack_dir: String::new(),
            channel: default_channel(),
            packages: Vec::new(),
            local_dir: None,
            store: StoreConfig::default(),
        }
    }
}

impl ImageConfig {
    pub fn load(doc: &ConfigDoc) -> Result<Self> {
        Ok(doc.deserialize_path("image")?.unwrap_or_default())
    }

    pub fn validate(&self, _doc: &ConfigDoc) -> Result<()> {
        for (key, value) in [
            ("model_file", &self.model_file),
            ("root_dir", &self.root_dir),
            ("gadget_unpack_dir", &self.gadget_unpack_dir),
            ("channel", &self.channel),
        ] {
            if value.trim().is_empty() {
                return Err(Error::new(
                    ErrorKind::Config,
                    format!("[image].{key} is required"),
                ));
            }
        }
        if let Some(i) = self.packages.iter().position(|p| p.trim().is_empty()) {
            return Err(Error::new(
                ErrorKind::Config,
                format!("[image].packages[{i}] is empty"),
            ));
        }
        Ok(())
    }

    /// Pipeline options with paths resolved against the build file.
    pub fn options(&self, doc: &ConfigDoc) -> Result<Options> {
        self.validate(doc)?;
        Ok(Options {
            packages: self.packages.iter().map(|p| p.trim().to_string()).collect(),
            root_dir: doc.resolve_path(&self.root_dir),
            channel: self.channel.trim().to_string(),
            model_file: doc.resolve_path(&self.model_file),
            gadget_unpack_dir: doc.resolve_path(&self.gadget_unpack_dir),
            local_dir: self
                .local_dir
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(|d| doc.resolve_path(d)),
        })
    }

    fn source_factory(&self, ctx: &ExecCtx) -> SharedSourceFactory {
        ctx.source_factory()
            .unwrap_or_else(|| Arc::new(HttpStoreFactory::new(self.store.clone())))
    }
}

#[Task(
    id = "image.gadget",
    module = "image",
    phase = "fetch",
    after = ["core.init"],
    default_label = "Fetch and unpack gadget",
    core = true
)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GadgetTask {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub label: Option<String>,
}

impl Default for GadgetTask {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
        }
    }
}

impl GadgetTask {
    fn run(&self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let cfg = ImageConfig::load(doc)?;
        let opts = cfg.options(doc)?;
        let factory = cfg.source_factory(ctx);

        ctx.log(&format!("model = {}", opts.model_file.display()));
        let pkg = image::download_unpack_gadget(&opts, factory.as_ref())?;
        ctx.log(&format!(
            "gadget {} unpacked into {}",
            pkg.display(),
            opts.gadget_unpack_dir.display()
        ));
        Ok(())
    }
}

#[Task(
    id = "image.bootstrap",
    module = "image",
    phase = "bootstrap",
    after = ["image.gadget"],
    default_label = "Bootstrap root filesystem",
    core = true
)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapTask {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub label: Option<String>,
}

impl Default for BootstrapTask {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
        }
    }
}

impl BootstrapTask {
    fn run(&self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let cfg = ImageConfig::load(doc)?;
        let opts = cfg.options(doc)?;
        let factory = cfg.source_factory(ctx);

        ctx.log(&format!("root = {}", opts.root_dir.display()));
        let seed = image::bootstrap_to_root_dir(&opts, factory.as_ref())?;
        for entry in &seed.packages {
            ctx.log(&format!("seeded {} ({})", entry.name, entry.revision));
        }
        Ok(())
    }
}

#[Module(
    id = "image",
    config = ImageConfig,
    config_path = "image",
    tasks = [GadgetTask, BootstrapTask]
)]
pub struct ImageModule;
