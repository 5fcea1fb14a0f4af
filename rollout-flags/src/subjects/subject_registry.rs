use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::{
    errors::ConfigurationError,
    flags::flag_models::FlagDefinition,
    subjects::subject_models::{IpAddressSubject, Subject, UserSubject, SUBJECT_TRAIT_PATH},
};

pub type SubjectFactory = fn() -> Arc<dyn Subject>;

#[derive(Clone, Copy)]
enum CatalogEntry {
    Concrete(SubjectFactory),
    Abstract,
}

/// Every subject implementation the process knows how to build, keyed by `module::Name`.
///
/// Configuration only ever names subjects; the catalog is what turns a name into an instance.
/// A name can also be registered as abstract, so configuring it fails loudly instead of being
/// reported as missing.
#[derive(Clone, Default)]
pub struct SubjectCatalog {
    modules: HashMap<String, HashMap<String, CatalogEntry>>,
}

impl SubjectCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog with the subjects shipped by this crate.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog
            .register(|| Arc::new(IpAddressSubject))
            .register(|| Arc::new(UserSubject))
            .register_abstract(SUBJECT_TRAIT_PATH);
        catalog
    }

    /// Registers a factory under the `subject_class` of the subject it builds.
    pub fn register(&mut self, factory: SubjectFactory) -> &mut Self {
        let path = factory().subject_class();
        self.insert(path, CatalogEntry::Concrete(factory));
        self
    }

    pub fn register_abstract(&mut self, path: &str) -> &mut Self {
        self.insert(path, CatalogEntry::Abstract);
        self
    }

    fn insert(&mut self, path: &str, entry: CatalogEntry) {
        let (module, name) = path.rsplit_once("::").unwrap_or(("", path));
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), entry);
    }

    pub fn instantiate(&self, path: &str) -> Result<Arc<dyn Subject>, ConfigurationError> {
        let (module, name) = path
            .rsplit_once("::")
            .filter(|(module, name)| !module.is_empty() && !name.is_empty())
            .ok_or_else(|| ConfigurationError::InvalidSubjectPath(path.to_string()))?;

        let entries = self
            .modules
            .get(module)
            .ok_or_else(|| ConfigurationError::UnknownModule(module.to_string()))?;

        match entries.get(name) {
            Some(CatalogEntry::Concrete(factory)) => Ok(factory()),
            Some(CatalogEntry::Abstract) => {
                Err(ConfigurationError::AbstractSubject(path.to_string()))
            }
            None => Err(ConfigurationError::UnknownSubject {
                module: module.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

/// The subjects configured for this process, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct SubjectRegistry {
    subjects: Vec<Arc<dyn Subject>>,
}

impl SubjectRegistry {
    /// Instantiates every configured subject up front, failing on the first bad name.
    pub fn from_config<S: AsRef<str>>(
        catalog: &SubjectCatalog,
        names: &[S],
    ) -> Result<Self, ConfigurationError> {
        let subjects = names
            .iter()
            .map(|name| catalog.instantiate(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(subjects = subjects.len(), "configured subject registry");
        Ok(Self { subjects })
    }

    pub fn new(subjects: Vec<Arc<dyn Subject>>) -> Self {
        Self { subjects }
    }

    pub fn get(&self, subject_class: &str) -> Option<&Arc<dyn Subject>> {
        self.subjects
            .iter()
            .find(|subject| subject.subject_class() == subject_class)
    }

    pub fn subjects(&self) -> &[Arc<dyn Subject>] {
        &self.subjects
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// `(subject_class, display_name)` pairs for admin selection.
    pub fn choices(&self) -> Vec<(&'static str, &'static str)> {
        self.subjects
            .iter()
            .map(|subject| (subject.subject_class(), subject.display_name()))
            .collect()
    }

    /// Like [`choices`](Self::choices), restricted to subjects the flag accepts.
    pub fn choices_for_flag(&self, flag: &dyn FlagDefinition) -> Vec<(&'static str, &'static str)> {
        self.subjects
            .iter()
            .filter(|subject| flag.accepts_subject(subject.as_ref()))
            .map(|subject| (subject.subject_class(), subject.display_name()))
            .collect()
    }
}
