// SPDX-License-Identifier: MIT

//! Workflow template definitions
//!
//! A template declares typed parameters and a list of stages. Every stage
//! becomes one rule; applying the rule adds the stage's steps as nodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use super::GraphError;

/// Top-level template document
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub stages: Vec<StageDef>,
}

/// Declared template parameter
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    /// Item type for array parameters
    pub items: Option<ParameterType>,
    pub default: Option<Value>,
}

/// Supported parameter types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Int,
    Float,
    Array,
    #[default]
    String,
}

/// A stage: one rule that adds its steps to the graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StageDef {
    pub name: String,
    /// Stages whose nodes must all succeed before this stage applies
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

/// A step: becomes one node when its stage is applied
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepDef {
    pub name: String,
    /// Shell command, may reference parameters as `{name}`
    pub command: Option<String>,
    #[serde(default)]
    pub depends_on: DependsOn,
}

/// Dependency specification for a step
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(untagged)]
pub enum DependsOn {
    /// No dependencies
    #[default]
    None,
    /// Single dependency
    Single(String),
    /// Multiple dependencies
    Multiple(Vec<String>),
}

impl DependsOn {
    /// Convert to a vector of dependency references
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            DependsOn::None => vec![],
            DependsOn::Single(s) => vec![s.clone()],
            DependsOn::Multiple(v) => v.clone(),
        }
    }
}

/// Node id for a step of a stage
pub fn node_id(stage: &str, step: &str) -> String {
    format!("{}.{}", stage, step)
}

/// Resolve a step dependency reference to a node id. Bare names refer to the
/// step's own stage.
pub fn resolve_dependency(stage: &str, reference: &str) -> String {
    if reference.contains('.') {
        reference.to_string()
    } else {
        node_id(stage, reference)
    }
}

impl WorkflowTemplate {
    /// Parse and validate a template document
    pub fn from_json(value: &Value) -> Result<Self, GraphError> {
        let template: WorkflowTemplate = serde_json::from_value(value.clone())
            .map_err(|e| GraphError::template(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.name.trim().is_empty() {
            return Err(GraphError::template("template name must not be empty"));
        }

        let mut parameter_names = HashSet::new();
        for parameter in &self.parameters {
            if !parameter_names.insert(parameter.name.as_str()) {
                return Err(GraphError::template(format!(
                    "duplicate parameter '{}'",
                    parameter.name
                )));
            }
        }

        let mut stages: HashMap<&str, &StageDef> = HashMap::new();
        for stage in &self.stages {
            if stages.insert(stage.name.as_str(), stage).is_some() {
                return Err(GraphError::template(format!(
                    "duplicate stage '{}'",
                    stage.name
                )));
            }
        }

        for stage in &self.stages {
            let mut dependencies = HashSet::new();
            for dependency in &stage.dependencies {
                if dependency == &stage.name || !stages.contains_key(dependency.as_str()) {
                    return Err(GraphError::template(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.name, dependency
                    )));
                }
                if !dependencies.insert(dependency.as_str()) {
                    return Err(GraphError::template(format!(
                        "stage '{}' lists dependency '{}' more than once",
                        stage.name, dependency
                    )));
                }
            }

            let mut steps = HashSet::new();
            for step in &stage.steps {
                if !steps.insert(step.name.as_str()) {
                    return Err(GraphError::template(format!(
                        "duplicate step '{}' in stage '{}'",
                        step.name, stage.name
                    )));
                }
            }

            for step in &stage.steps {
                for reference in step.depends_on.to_vec() {
                    self.check_step_reference(stage, &reference, &stages)?;
                }
            }
        }

        self.check_acyclic()
    }

    /// A step may depend on a sibling step or on a step of a declared dependency stage
    fn check_step_reference(
        &self,
        stage: &StageDef,
        reference: &str,
        stages: &HashMap<&str, &StageDef>,
    ) -> Result<(), GraphError> {
        let known = match reference.split_once('.') {
            None => !reference.is_empty() && stage.steps.iter().any(|s| s.name == reference),
            Some((other, step)) => {
                stage.dependencies.iter().any(|d| d == other)
                    && stages
                        .get(other)
                        .is_some_and(|s| s.steps.iter().any(|st| st.name == step))
            }
        };
        if known {
            Ok(())
        } else {
            Err(GraphError::template(format!(
                "step dependency '{}' in stage '{}' cannot be resolved",
                reference, stage.name
            )))
        }
    }

    /// Kahn's algorithm over stage dependencies, which must be distinct
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .stages
            .iter()
            .map(|s| (s.name.as_str(), s.dependencies.len()))
            .collect();
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut visited = 0;
        while let Some(done) = ready.pop() {
            visited += 1;
            for stage in &self.stages {
                if stage.dependencies.iter().any(|d| d == done) {
                    if let Some(degree) = in_degree.get_mut(stage.name.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(stage.name.as_str());
                        }
                    }
                }
            }
        }

        if visited == self.stages.len() {
            return Ok(());
        }

        let mut cycle: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        cycle.sort();
        Err(GraphError::CircularDependency(cycle))
    }
}

/// Resolve supplied values against the declared parameters.
///
/// Supplied value wins over the default; a parameter with neither is an error.
/// Undeclared keys are dropped.
pub fn resolve_parameters(
    defs: &[ParameterDef],
    supplied: &Map<String, Value>,
) -> Result<Map<String, Value>, GraphError> {
    let mut resolved = Map::new();
    for def in defs {
        let raw = supplied
            .get(&def.name)
            .or(def.default.as_ref())
            .ok_or_else(|| {
                GraphError::parameter(format!("missing value for parameter '{}'", def.name))
            })?;
        let value = coerce(&def.name, raw, def.param_type, def.items)?;
        resolved.insert(def.name.clone(), value);
    }

    for key in supplied.keys() {
        if !defs.iter().any(|d| &d.name == key) {
            log::debug!("Ignoring undeclared parameter '{}'", key);
        }
    }

    Ok(resolved)
}

fn coerce(
    name: &str,
    value: &Value,
    param_type: ParameterType,
    items: Option<ParameterType>,
) -> Result<Value, GraphError> {
    let invalid = || {
        GraphError::parameter(format!(
            "value {} for parameter '{}' is not a valid {:?}",
            value, name, param_type
        ))
    };

    match param_type {
        ParameterType::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral))
                .map(Value::from)
                .ok_or_else(invalid),
            Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        ParameterType::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(invalid),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        },
        ParameterType::String => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid()),
        },
        ParameterType::Array => {
            let item_type = items.unwrap_or_default();
            if item_type == ParameterType::Array {
                return Err(GraphError::parameter(format!(
                    "parameter '{}' cannot declare nested arrays",
                    name
                )));
            }
            let elements: Vec<Value> = match value {
                Value::Array(values) => values.clone(),
                Value::String(s) if s.trim().is_empty() => vec![],
                Value::String(s) => s
                    .split(',')
                    .map(|part| Value::String(part.trim().to_string()))
                    .collect(),
                _ => return Err(invalid()),
            };
            elements
                .iter()
                .map(|element| coerce(name, element, item_type, None))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
    }
}

/// Whole floats inside the i64 range; `i64::MAX as f64` rounds up to 2^63.
fn integral(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_depends_on_deserialize() {
        let yaml = r#"
            name: merge
            depends_on:
              - left
              - right
        "#;
        let step: StepDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.depends_on.to_vec(), vec!["left", "right"]);

        let single: StepDef = serde_yaml::from_str("name: b\ndepends_on: a").unwrap();
        assert_eq!(single.depends_on, DependsOn::Single("a".to_string()));

        let none: StepDef = serde_yaml::from_str("name: a").unwrap();
        assert_eq!(none.depends_on, DependsOn::None);
        assert!(none.depends_on.to_vec().is_empty());
    }

    #[test]
    fn test_parse_template_from_yaml() {
        let yaml = r#"
name: analysis
parameters:
  - name: nevents
    type: int
    default: 100
  - name: seeds
    type: array
    items: int
stages:
  - name: prepare
    steps:
      - name: fetch
        command: "fetch --events {nevents}"
  - name: analyze
    dependencies: [prepare]
    steps:
      - name: run
        depends_on: prepare.fetch
"#;
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let template = WorkflowTemplate::from_json(&value).unwrap();

        assert_eq!(template.name, "analysis");
        assert_eq!(template.parameters.len(), 2);
        assert_eq!(template.parameters[0].param_type, ParameterType::Int);
        assert_eq!(template.parameters[1].items, Some(ParameterType::Int));
        assert_eq!(template.stages[1].dependencies, vec!["prepare"]);
    }

    #[test]
    fn test_parameter_type_defaults_to_string() {
        let def: ParameterDef = serde_json::from_value(json!({"name": "label"})).unwrap();
        assert_eq!(def.param_type, ParameterType::String);
    }

    #[test]
    fn test_rejects_empty_name() {
        let result = WorkflowTemplate::from_json(&json!({"name": "  "}));
        assert!(matches!(result, Err(GraphError::Template(_))));
    }

    #[test]
    fn test_rejects_unknown_stage_dependency() {
        let result = WorkflowTemplate::from_json(&json!({
            "name": "t",
            "stages": [{"name": "a", "dependencies": ["missing"]}]
        }));
        assert!(matches!(result, Err(GraphError::Template(_))));
    }

    #[test]
    fn test_rejects_duplicate_stage_and_step() {
        let stages = WorkflowTemplate::from_json(&json!({
            "name": "t",
            "stages": [{"name": "a"}, {"name": "a"}]
        }));
        assert!(matches!(stages, Err(GraphError::Template(_))));

        let steps = WorkflowTemplate::from_json(&json!({
            "name": "t",
            "stages": [{"name": "a", "steps": [{"name": "x"}, {"name": "x"}]}]
        }));
        assert!(matches!(steps, Err(GraphError::Template(_))));
    }

    #[test]
    fn test_rejects_unresolvable_step_dependency() {
        let sibling = WorkflowTemplate::from_json(&json!({
            "name": "t",
            "stages": [{"name": "a", "steps": [{"name": "x", "depends_on": "nope"}]}]
        }));
        assert!(matches!(sibling, Err(GraphError::Template(_))));

        // Cross-stage references must go through a declared stage dependency
        let undeclared = WorkflowTemplate::from_json(&json!({
            "name": "t",
            "stages": [
                {"name": "a", "steps": [{"name": "x"}]},
                {"name": "b", "steps": [{"name": "y", "depends_on": "a.x"}]}
            ]
        }));
        assert!(matches!(undeclared, Err(GraphError::Template(_))));
    }

    #[test]
    fn test_detects_stage_cycle() {
        let result = WorkflowTemplate::from_json(&json!({
            "name": "t",
            "stages": [
                {"name": "a", "dependencies": ["b"]},
                {"name": "b", "dependencies": ["a"]},
                {"name": "c"}
            ]
        }));
        match result {
            Err(GraphError::CircularDependency(stages)) => assert_eq!(stages, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_repeated_stage_dependency() {
        let result = WorkflowTemplate::from_json(&json!({
            "name": "t",
            "stages": [
                {"name": "a"},
                {"name": "b", "dependencies": ["a", "a"]}
            ]
        }));
        match result {
            Err(GraphError::Template(message)) => assert!(message.contains("more than once")),
            other => panic!("expected template error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_uses_default_and_supplied() {
        let defs: Vec<ParameterDef> = serde_json::from_value(json!([
            {"name": "nevents", "type": "int", "default": 100},
            {"name": "label", "type": "string"}
        ]))
        .unwrap();

        let resolved = resolve_parameters(&defs, &params(json!({"label": "run1"}))).unwrap();
        assert_eq!(resolved["nevents"], json!(100));
        assert_eq!(resolved["label"], json!("run1"));

        let overridden =
            resolve_parameters(&defs, &params(json!({"nevents": "50", "label": 7}))).unwrap();
        assert_eq!(overridden["nevents"], json!(50));
        assert_eq!(overridden["label"], json!("7"));
    }

    #[test]
    fn test_resolve_missing_parameter_fails() {
        let defs: Vec<ParameterDef> =
            serde_json::from_value(json!([{"name": "label", "type": "string"}])).unwrap();
        let result = resolve_parameters(&defs, &Map::new());
        assert!(matches!(result, Err(GraphError::Parameter(_))));
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(
            coerce("n", &json!("42"), ParameterType::Int, None).unwrap(),
            json!(42)
        );
        assert_eq!(
            coerce("n", &json!(3.0), ParameterType::Int, None).unwrap(),
            json!(3)
        );
        assert!(coerce("n", &json!(3.5), ParameterType::Int, None).is_err());
        assert!(coerce("n", &json!("abc"), ParameterType::Int, None).is_err());
        assert_eq!(
            coerce("x", &json!("0.25"), ParameterType::Float, None).unwrap(),
            json!(0.25)
        );
        assert!(coerce("x", &json!(true), ParameterType::Float, None).is_err());
    }

    #[test]
    fn test_coerce_int_out_of_range_fails() {
        assert!(coerce("n", &json!(1e19), ParameterType::Int, None).is_err());
        assert!(coerce("n", &json!(-1e19), ParameterType::Int, None).is_err());
        assert!(coerce("n", &json!(u64::MAX), ParameterType::Int, None).is_err());
        assert!(coerce("n", &json!("18446744073709551615"), ParameterType::Int, None).is_err());
        assert_eq!(
            coerce("n", &json!(i64::MAX), ParameterType::Int, None).unwrap(),
            json!(i64::MAX)
        );
        assert_eq!(
            coerce("n", &json!(-4096.0), ParameterType::Int, None).unwrap(),
            json!(-4096)
        );
    }

    #[test]
    fn test_coerce_float_rejects_non_finite() {
        for raw in ["NaN", "nan", "inf", "-inf", "infinity"] {
            assert!(
                coerce("x", &json!(raw), ParameterType::Float, None).is_err(),
                "{} should be rejected",
                raw
            );
        }
        let defs: Vec<ParameterDef> =
            serde_json::from_value(json!([{"name": "ratio", "type": "float"}])).unwrap();
        let result = resolve_parameters(&defs, &params(json!({"ratio": "NaN"})));
        assert!(matches!(result, Err(GraphError::Parameter(_))));
    }

    #[test]
    fn test_coerce_arrays() {
        assert_eq!(
            coerce("a", &json!("1, 2,3"), ParameterType::Array, Some(ParameterType::Int)).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            coerce("a", &json!(["x", 1]), ParameterType::Array, None).unwrap(),
            json!(["x", "1"])
        );
        assert_eq!(
            coerce("a", &json!(""), ParameterType::Array, None).unwrap(),
            json!([])
        );
        assert!(coerce("a", &json!("1,b"), ParameterType::Array, Some(ParameterType::Float)).is_err());
        assert!(coerce("a", &json!({"k": 1}), ParameterType::Array, None).is_err());
    }
}
