//! Static algorithm descriptors.

use crate::path::DataPath;
use avalanche_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Realm an algorithm is scheduled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Realm {
    /// Regular event algorithm, part of the control-flow tree
    #[default]
    Event,
    /// Conditions producer, scheduled outside the event control flow
    Conditions,
}

/// How decisions of the sub-slots of one view node are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewCombine {
    /// The view node passes if any view passes
    #[default]
    Or,
    /// The view node passes only if every view passes
    And,
}

impl ViewCombine {
    /// Decision of a view node that received zero views
    #[must_use]
    pub const fn identity(&self) -> bool {
        matches!(self, Self::And)
    }
}

/// Declares an algorithm as the view maker of a control-flow node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewSpec {
    /// Name of the control-flow node whose children run once per view
    pub node: String,
    /// Path where the maker writes its `ViewSet`
    pub collection: DataPath,
    /// Paths the maker seeds into every view
    #[serde(default)]
    pub outputs: Vec<DataPath>,
    /// Combination of per-view decisions
    #[serde(default)]
    pub combine: ViewCombine,
}

fn default_cardinality() -> u32 {
    1
}

/// Static description of one algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlgorithmDescriptor {
    /// Unique algorithm name
    pub name: String,
    /// Implementation name looked up in the algorithm registry
    #[serde(rename = "type", default)]
    pub type_name: String,
    /// Paths read
    #[serde(default)]
    pub inputs: Vec<DataPath>,
    /// Paths written
    #[serde(default)]
    pub outputs: Vec<DataPath>,
    /// Maximum number of concurrently executing clones
    #[serde(default = "default_cardinality")]
    pub cardinality: u32,
    /// Whether clones may execute concurrently at all
    #[serde(default)]
    pub reentrant: bool,
    /// Exclusive resource tags held while executing
    #[serde(default)]
    pub resources: Vec<String>,
    /// Scheduling realm
    #[serde(default)]
    pub realm: Realm,
    /// Whether the algorithm blocks on I/O
    #[serde(default)]
    pub blocking: bool,
    /// View creation, when this algorithm is a view maker
    #[serde(default)]
    pub views: Option<ViewSpec>,
    /// Implementation-specific settings, interpreted by the registered constructor
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl AlgorithmDescriptor {
    /// Create a descriptor with no data dependencies
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            type_name: name.clone(),
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            cardinality: 1,
            reentrant: false,
            resources: Vec::new(),
            realm: Realm::Event,
            blocking: false,
            views: None,
            properties: serde_json::Value::Null,
        }
    }

    /// Set the implementation name
    #[must_use]
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// Add an input path
    ///
    /// # Panics
    ///
    /// Panics if the path is malformed; intended for programmatic setups
    /// where paths are literals. Use [`Self::try_reads`] for anything else.
    #[must_use]
    pub fn reads(self, path: &str) -> Self {
        literal(self.try_reads(path))
    }

    /// Add an output path
    ///
    /// # Panics
    ///
    /// Panics if the path is malformed.
    #[must_use]
    pub fn writes(self, path: &str) -> Self {
        literal(self.try_writes(path))
    }

    /// Add an input path parsed at runtime
    ///
    /// # Errors
    ///
    /// `Configuration` naming the algorithm if the path is malformed
    pub fn try_reads(mut self, path: &str) -> CoreResult<Self> {
        let parsed = self.parse_path(path)?;
        self.inputs.push(parsed);
        Ok(self)
    }

    /// Add an output path parsed at runtime
    ///
    /// # Errors
    ///
    /// `Configuration` naming the algorithm if the path is malformed
    pub fn try_writes(mut self, path: &str) -> CoreResult<Self> {
        let parsed = self.parse_path(path)?;
        self.outputs.push(parsed);
        Ok(self)
    }

    fn parse_path(&self, path: &str) -> CoreResult<DataPath> {
        DataPath::parse(path).map_err(|e| CoreError::Configuration {
            errors: vec![format!("algorithm '{}': {}", self.name, e)],
        })
    }

    /// Set cardinality and mark the algorithm reentrant
    #[must_use]
    pub fn with_cardinality(mut self, cardinality: u32) -> Self {
        self.cardinality = cardinality;
        self.reentrant = true;
        self
    }

    /// Add an exclusive resource tag
    #[must_use]
    pub fn with_resource(mut self, tag: impl Into<String>) -> Self {
        self.resources.push(tag.into());
        self
    }

    /// Move the algorithm to the conditions realm
    #[must_use]
    pub fn conditions(mut self) -> Self {
        self.realm = Realm::Conditions;
        self
    }

    /// Mark the algorithm as blocking
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Make this algorithm the view maker of `node`
    #[must_use]
    pub fn with_views(mut self, views: ViewSpec) -> Self {
        self.views = Some(views);
        self
    }

    /// Attach implementation properties
    #[must_use]
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    /// Number of clones the pool may create
    ///
    /// Non-reentrant algorithms are limited to a single clone whatever
    /// cardinality was requested.
    #[must_use]
    pub fn effective_cardinality(&self) -> u32 {
        if self.reentrant { self.cardinality } else { self.cardinality.min(1) }
    }

    /// Every path this algorithm makes visible: its outputs, its view
    /// collection and the paths it seeds into views
    pub fn produced_paths(&self) -> impl Iterator<Item = &DataPath> {
        self.outputs.iter().chain(
            self.views
                .iter()
                .flat_map(|v| std::iter::once(&v.collection).chain(v.outputs.iter())),
        )
    }
}

fn literal(built: CoreResult<AlgorithmDescriptor>) -> AlgorithmDescriptor {
    match built {
        Ok(d) => d,
        Err(e) => panic!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let d = AlgorithmDescriptor::new("Fitter")
            .reads("Tracks")
            .writes("/Event/Fits")
            .with_cardinality(4)
            .with_resource("gpu");
        assert_eq!(d.type_name, "Fitter");
        assert_eq!(d.inputs[0].as_str(), "/Event/Tracks");
        assert_eq!(d.outputs[0].as_str(), "/Event/Fits");
        assert_eq!(d.effective_cardinality(), 4);
        assert_eq!(d.resources, vec!["gpu".to_string()]);
    }

    #[test]
    fn test_try_reads_reports_malformed_path() {
        let err = AlgorithmDescriptor::new("Fitter").try_reads("Tracks//bad").unwrap_err();
        assert!(matches!(&err, CoreError::Configuration { errors } if errors.len() == 1));
        let rendered = err.to_string();
        assert!(rendered.contains("Fitter"));
        assert!(rendered.contains("Tracks//bad"));

        assert!(AlgorithmDescriptor::new("Fitter").try_writes("/Event/a b").is_err());

        let d = AlgorithmDescriptor::new("Fitter")
            .try_reads("Tracks")
            .and_then(|d| d.try_writes("/Event/Fits"))
            .unwrap();
        assert_eq!(d.inputs[0].as_str(), "/Event/Tracks");
        assert_eq!(d.outputs[0].as_str(), "/Event/Fits");
    }

    #[test]
    #[should_panic(expected = "invalid data path")]
    fn test_reads_panics_on_malformed_literal() {
        let _ = AlgorithmDescriptor::new("Fitter").reads("a//b");
    }

    #[test]
    fn test_non_reentrant_cardinality_is_one() {
        let mut d = AlgorithmDescriptor::new("Legacy");
        d.cardinality = 8;
        assert_eq!(d.effective_cardinality(), 1);
        d.cardinality = 0;
        assert_eq!(d.effective_cardinality(), 0);
    }

    #[test]
    fn test_produced_paths_include_views() {
        let d = AlgorithmDescriptor::new("Maker").writes("Seeds").with_views(ViewSpec {
            node: "PerRoI".to_string(),
            collection: DataPath::parse("RoIViews").unwrap(),
            outputs: vec![DataPath::parse("RoI/pt").unwrap()],
            combine: ViewCombine::Or,
        });
        let produced: Vec<_> = d.produced_paths().map(|p| p.as_str().to_string()).collect();
        assert_eq!(produced, vec!["/Event/Seeds", "/Event/RoIViews", "/Event/RoI/pt"]);
    }

    #[test]
    fn test_deserialize_defaults() {
        let d: AlgorithmDescriptor =
            serde_json::from_str(r#"{"name": "A", "outputs": ["/Event/x"]}"#).unwrap();
        assert_eq!(d.cardinality, 1);
        assert!(!d.reentrant);
        assert_eq!(d.realm, Realm::Event);
        assert!(d.views.is_none());
        assert!(d.type_name.is_empty());
    }

    #[test]
    fn test_deserialize_rejects_unknown_field() {
        let r: Result<AlgorithmDescriptor, _> =
            serde_json::from_str(r#"{"name": "A", "outptus": []}"#);
        assert!(r.is_err());
    }
}
