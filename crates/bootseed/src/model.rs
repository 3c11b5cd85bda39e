use std::fs;
use std::path::Path;

use crate::assertion::{self, Assertion};
use crate::error::{Error, ErrorKind, Result};

/// Device model declared by a signed `model` assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    brand_id: String,
    model: String,
    series: String,
    store: String,
    architecture: String,
    gadget: String,
    kernel: String,
    core: String,
    required_packages: Vec<String>,
}

impl Model {
    // Callers check the assertion kind first.
    fn from_assertion(a: &Assertion) -> Result<Self> {
        let required = |name: &str| -> Result<String> {
            a.header_str(name).map(ToOwned::to_owned).ok_or_else(|| {
                Error::new(
                    ErrorKind::Decode,
                    format!("model assertion is missing '{name}'"),
                )
            })
        };
        let optional = |name: &str| a.header_str(name).unwrap_or_default().to_string();

        Ok(Self {
            brand_id: optional("brand-id"),
            model: optional("model"),
            series: optional("series"),
            store: optional("store"),
            architecture: required("architecture")?,
            gadget: required("gadget")?,
            kernel: required("kernel")?,
            core: required("core")?,
            required_packages: a.header_list("required-packages")?,
        })
    }

    pub fn brand_id(&self) -> &str {
        &self.brand_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn gadget(&self) -> &str {
        &self.gadget
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn core(&self) -> &str {
        &self.core
    }

    pub fn required_packages(&self) -> &[String] {
        &self.required_packages
    }
}

pub fn decode_model(path: &Path) -> Result<Model> {
    let raw = fs::read(path).map_err(|e| {
        Error::new(
            ErrorKind::Read,
            format!("cannot read model assertion {}: {e}", path.display()),
        )
    })?;

    let a = assertion::decode(&raw)
        .map_err(|e| e.context(format!("cannot decode model assertion {}", path.display())))?;
    if a.kind() != "model" {
        return Err(Error::new(
            ErrorKind::TypeMismatch,
            format!(
                "assertion in {} is not a model assertion (type '{}')",
                path.display(),
                a.kind()
            ),
        ));
    }
    Model::from_assertion(&a)
        .map_err(|e| e.context(format!("cannot decode model assertion {}", path.display())))
}
