//! Formation documents: parsing, machine expansion and lint.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use fm_infra::types::LaunchSpec;
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const DEFAULT_TYPE: &str = "t2.nano";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const BOOT_KEY: &str = "__boot__";

/// Whether `key` is an engine option (`__name__`) rather than a launch
/// parameter.
pub fn is_option_key(key: &str) -> bool {
    key.len() > 4
        && key.starts_with("__")
        && key.ends_with("__")
        && key[2..key.len() - 2].chars().all(|c| c.is_ascii_alphanumeric())
}

/// Expanded name of entry `index` in a group of `len` machines.
pub fn expanded_name(group: &str, index: usize, len: usize) -> String {
    if len > 1 {
        format!("{group}{index}")
    } else {
        group.to_string()
    }
}

/// One concrete machine after expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSpec {
    pub name: String,
    /// Template key the machine was expanded from.
    pub group: String,
    /// Config defaults merged beneath the entry, options stripped.
    pub params: Map<String, Value>,
}

impl MachineSpec {
    fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn instance_type(&self) -> &str {
        self.param_str("type").unwrap_or(DEFAULT_TYPE)
    }

    pub fn region(&self) -> &str {
        self.param_str("region").unwrap_or(DEFAULT_REGION)
    }

    pub fn key_name(&self) -> Option<&str> {
        self.param_str("keyName")
    }

    /// Launch parameters for the provisioning collaborator. Keys the core
    /// does not interpret travel in `extra`.
    pub fn launch_spec(&self) -> LaunchSpec {
        let mut spec = LaunchSpec {
            name: self.name.clone(),
            instance_type: self.instance_type().to_string(),
            region: self.region().to_string(),
            image: self
                .param_str("image")
                .or_else(|| self.param_str("imageId"))
                .map(str::to_string),
            key_name: self.key_name().map(str::to_string),
            ..LaunchSpec::default()
        };

        for (key, value) in &self.params {
            match key.as_str() {
                "name" | "type" | "region" | "image" | "imageId" | "keyName" => {}
                "tags" => {
                    if let Some(tags) = value.as_object() {
                        spec.tags = tags
                            .iter()
                            .map(|(k, v)| (k.clone(), v.as_str().map_or_else(|| v.to_string(), str::to_string)))
                            .collect();
                    }
                }
                _ => {
                    spec.extra.insert(key.clone(), value.clone());
                }
            }
        }
        spec
    }
}

/// A named script: its command lines exactly as written in the template.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub lines: Vec<Value>,
}

impl Script {
    /// An unnamed script of literal commands.
    pub fn inline(command: &str) -> Self {
        Self {
            name: command.to_string(),
            lines: vec![Value::String(command.to_string())],
        }
    }
}

/// The loaded, expanded deployment template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Formation {
    pub config: Map<String, Value>,
    pub machines: Vec<MachineSpec>,
    pub scripts: BTreeMap<String, Script>,
    pub services: Map<String, Value>,
    /// Task definitions keyed by family.
    pub task_definitions: Map<String, Value>,
    /// Top-level keys the engine does not use.
    pub extra: Map<String, Value>,
    boot: BTreeMap<String, Vec<String>>,
}

impl Formation {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let formation = Self::from_slice(&bytes)?;
        tracing::debug!(
            path = %path.display(),
            machines = formation.machines.len(),
            scripts = formation.scripts.len(),
            "formation loaded"
        );
        Ok(formation)
    }

    /// Parse a JSON or YAML document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Template(format!("document is not utf-8: {e}")))?;
        let document: Value = if text.trim_start().starts_with('{') {
            serde_json::from_str(text)?
        } else {
            serde_yaml::from_str(text)?
        };
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self> {
        let mut root = match document {
            Value::Object(root) => root,
            Value::Null => Map::new(),
            other => {
                return Err(Error::Template(format!(
                    "document root must be an object, got {}",
                    kind(&other)
                )));
            }
        };

        let mut config = section(&mut root, "config")?;
        config
            .entry("type")
            .or_insert_with(|| Value::String(DEFAULT_TYPE.into()));
        config
            .entry("region")
            .or_insert_with(|| Value::String(DEFAULT_REGION.into()));

        let mut formation = Formation {
            scripts: parse_scripts(section(&mut root, "scripts")?)?,
            services: section(&mut root, "services")?,
            task_definitions: parse_task_definitions(root.remove("taskDefinitions"))?,
            ..Formation::default()
        };

        for (group, entry) in section(&mut root, "machines")? {
            let entries: Vec<Map<String, Value>> = match entry {
                Value::Object(single) => vec![single],
                Value::Array(list) => list
                    .into_iter()
                    .filter(|v| !v.is_null())
                    .map(|v| match v {
                        Value::Object(machine) => Ok(machine),
                        other => Err(Error::Template(format!(
                            "machine \"{group}\" entries must be objects, got {}",
                            kind(&other)
                        ))),
                    })
                    .collect::<Result<_>>()?,
                Value::Null => Vec::new(),
                other => {
                    return Err(Error::Template(format!(
                        "machine \"{group}\" must be an object or a list, got {}",
                        kind(&other)
                    )));
                }
            };

            let len = entries.len();
            for (index, entry) in entries.into_iter().enumerate() {
                let name = expanded_name(&group, index, len);
                let mut params: Map<String, Value> = config
                    .iter()
                    .filter(|(key, _)| !is_option_key(key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                for (key, value) in entry {
                    if key == BOOT_KEY {
                        formation.boot.insert(name.clone(), parse_boot(&name, value)?);
                    } else if !is_option_key(&key) {
                        params.insert(key, value);
                    }
                }
                if !formation.boot.contains_key(&name) {
                    if let Some(inherited) = config.get(BOOT_KEY) {
                        formation.boot.insert(name.clone(), parse_boot(&name, inherited.clone())?);
                    }
                }
                params.insert("name".into(), Value::String(name.clone()));

                formation.machines.push(MachineSpec {
                    name,
                    group: group.clone(),
                    params,
                });
            }
        }

        formation.config = config;
        // Every known section has been taken out of `root` by now.
        formation.extra = root;
        Ok(formation)
    }

    /// Reject duplicate expanded names and boot lists that name unknown
    /// scripts.
    pub fn lint(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for machine in &self.machines {
            if !seen.insert(machine.name.as_str()) {
                return Err(Error::DuplicateMachine(machine.name.clone()));
            }
        }
        for machine in &self.machines {
            for script in self.boot_scripts(&machine.name) {
                if !self.scripts.contains_key(script) {
                    return Err(Error::MissingScript {
                        machine: machine.name.clone(),
                        script: script.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn machine(&self, name: &str) -> Option<&MachineSpec> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn machine_names(&self) -> impl Iterator<Item = &str> {
        self.machines.iter().map(|m| m.name.as_str())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.machine(name).is_some()
    }

    /// Boot scripts for a machine, in declared order.
    pub fn boot_scripts(&self, machine: &str) -> &[String] {
        self.boot.get(machine).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn script(&self, name: &str) -> Option<&Script> {
        self.scripts.get(name)
    }

    /// The named script, or `name` itself as a one-line inline command.
    pub fn script_or_inline(&self, name: &str) -> Script {
        self.script(name)
            .cloned()
            .unwrap_or_else(|| Script::inline(name))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn section(root: &mut Map<String, Value>, key: &str) -> Result<Map<String, Value>> {
    match root.remove(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(Error::Template(format!(
            "\"{key}\" must be an object, got {}",
            kind(&other)
        ))),
    }
}

fn parse_scripts(raw: Map<String, Value>) -> Result<BTreeMap<String, Script>> {
    raw.into_iter()
        .map(|(name, value)| {
            let lines = match value {
                Value::Array(lines) => lines,
                Value::String(line) => vec![Value::String(line)],
                other => {
                    return Err(Error::Template(format!(
                        "script \"{name}\" must be a string or a list, got {}",
                        kind(&other)
                    )));
                }
            };
            Ok((name.clone(), Script { name, lines }))
        })
        .collect()
}

fn parse_boot(machine: &str, value: Value) -> Result<Vec<String>> {
    let invalid = || Error::InvalidBoot {
        machine: machine.to_string(),
    };
    match value {
        Value::Array(names) => names
            .into_iter()
            .map(|v| match v {
                Value::String(name) => Ok(name),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

fn parse_task_definitions(raw: Option<Value>) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    match raw {
        None | Some(Value::Null) => {}
        Some(Value::Object(by_family)) => {
            for (family, value) in by_family {
                let mut definition = value.as_object().cloned().ok_or_else(|| {
                    Error::Template(format!("task definition \"{family}\" must be an object"))
                })?;
                definition.insert("family".into(), Value::String(family.clone()));
                out.insert(family, Value::Object(definition));
            }
        }
        Some(Value::Array(list)) => {
            for value in list {
                let family = value
                    .get("family")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Template("task definition list entries need a \"family\"".into()))?
                    .to_string();
                out.insert(family, value);
            }
        }
        Some(other) => {
            return Err(Error::Template(format!(
                "\"taskDefinitions\" must be an object or a list, got {}",
                kind(&other)
            )));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formation(doc: Value) -> Formation {
        Formation::from_value(doc).unwrap()
    }

    #[test]
    fn option_keys() {
        assert!(is_option_key("__boot__"));
        assert!(is_option_key("__x1__"));
        assert!(!is_option_key("____"));
        assert!(!is_option_key("__boot"));
        assert!(!is_option_key("__bo-ot__"));
        assert!(!is_option_key("type"));
    }

    #[test]
    fn empty_document_gets_defaults() {
        let f = formation(json!({}));
        assert!(f.machines.is_empty());
        assert!(f.scripts.is_empty());
        assert_eq!(f.config["type"], "t2.nano");
        assert_eq!(f.config["region"], "us-east-1");
    }

    #[test]
    fn entry_overrides_config() {
        let f = formation(json!({
            "config": { "region": "eu-west-1", "keyName": "deploy" },
            "machines": { "web": { "type": "m5.large" } },
        }));
        let web = f.machine("web").unwrap();
        assert_eq!(web.instance_type(), "m5.large");
        assert_eq!(web.region(), "eu-west-1");
        assert_eq!(web.key_name(), Some("deploy"));
        assert_eq!(web.params["name"], "web");
    }

    #[test]
    fn list_groups_expand_with_suffixes() {
        let f = formation(json!({
            "machines": {
                "web": {},
                "db": [{}, {}],
                "cache": [{}],
            },
        }));
        let names: Vec<_> = f.machine_names().collect();
        assert_eq!(names, ["web", "db0", "db1", "cache"]);
        assert_eq!(f.machine("db1").unwrap().group, "db");
    }

    #[test]
    fn options_are_stripped_and_boot_kept_aside() {
        let f = formation(json!({
            "machines": { "web": { "__boot__": ["a", "b"], "__note__": "x", "type": "t3.micro" } },
            "scripts": { "a": ["echo a"], "b": "echo b" },
        }));
        let web = f.machine("web").unwrap();
        assert!(!web.params.contains_key("__boot__"));
        assert!(!web.params.contains_key("__note__"));
        assert_eq!(f.boot_scripts("web"), ["a", "b"]);
        assert_eq!(f.script("b").unwrap().lines, vec![json!("echo b")]);
        f.lint().unwrap();
    }

    #[test]
    fn non_array_boot_fails_at_load() {
        let err = Formation::from_value(json!({
            "machines": { "web": { "__boot__": "setup" } },
        }))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBoot { machine } if machine == "web"));
    }

    #[test]
    fn lint_rejects_collisions() {
        let f = formation(json!({
            "machines": { "db": [{}, {}], "db1": {} },
        }));
        assert!(matches!(f.lint(), Err(Error::DuplicateMachine(name)) if name == "db1"));
    }

    #[test]
    fn lint_rejects_missing_boot_script() {
        let f = formation(json!({
            "machines": { "web": { "__boot__": ["setup"] } },
        }));
        match f.lint() {
            Err(Error::MissingScript { machine, script }) => {
                assert_eq!(machine, "web");
                assert_eq!(script, "setup");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn yaml_documents_parse() {
        let f = Formation::from_slice(
            b"machines:\n  web:\n    type: t3.small\nscripts:\n  default:\n    - echo hi\n",
        )
        .unwrap();
        assert_eq!(f.machine("web").unwrap().instance_type(), "t3.small");
        assert_eq!(f.script("default").unwrap().lines, vec![json!("echo hi")]);
    }

    #[test]
    fn unknown_sections_are_preserved() {
        let f = formation(json!({ "owner": "ops", "machines": {} }));
        assert_eq!(f.extra.get("owner"), Some(&json!("ops")));
        assert!(!f.extra.contains_key("machines"));
    }

    #[test]
    fn task_definitions_keyed_by_family() {
        let f = formation(json!({
            "taskDefinitions": { "api": { "containerDefinitions": [] } },
        }));
        assert_eq!(f.task_definitions["api"]["family"], "api");
    }

    #[test]
    fn launch_spec_splits_known_params() {
        let f = formation(json!({
            "machines": { "web": {
                "image": "ami-123",
                "tags": { "team": "ops", "tier": 1 },
                "subnetId": "subnet-9",
            } },
        }));
        let spec = f.machine("web").unwrap().launch_spec();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.instance_type, "t2.nano");
        assert_eq!(spec.image.as_deref(), Some("ami-123"));
        assert_eq!(spec.tags["team"], "ops");
        assert_eq!(spec.tags["tier"], "1");
        assert_eq!(spec.extra["subnetId"], "subnet-9");
        assert!(!spec.extra.contains_key("name"));
    }

    #[test]
    fn unknown_script_is_inline() {
        let f = formation(json!({ "scripts": { "hello": ["echo hello"] } }));
        assert_eq!(f.script_or_inline("hello").lines, vec![json!("echo hello")]);
        let inline = f.script_or_inline("uptime");
        assert_eq!(inline.lines, vec![json!("uptime")]);
    }
}
