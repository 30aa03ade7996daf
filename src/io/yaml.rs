//! YAML documents with `!include`, `!includes` and `!env` tags.

use std::path::Path;

use serde_yaml::value::TaggedValue;

use super::Loader;
use crate::dict::FlatDict;
use crate::error::{Error, Result};
use crate::value::Value;

pub(super) fn convert(value: serde_yaml::Value, loader: &mut Loader, base: &Path) -> Result<Value> {
    let converted = match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_yaml::Value::String(s) => Value::Str(s),
        serde_yaml::Value::Sequence(items) => {
            let items = items
                .into_iter()
                .map(|item| convert(item, loader, base))
                .collect::<Result<Vec<_>>>()?;
            Value::List(items.into())
        }
        serde_yaml::Value::Mapping(map) => {
            let dict = FlatDict::new();
            for (key, value) in map {
                let key = key_text(key)?;
                dict.store(key, convert(value, loader, base)?);
            }
            Value::Flat(dict)
        }
        serde_yaml::Value::Tagged(tagged) => apply_tag(*tagged, loader, base)?,
    };
    Ok(converted)
}

fn apply_tag(tagged: TaggedValue, loader: &mut Loader, base: &Path) -> Result<Value> {
    let TaggedValue { tag, value } = tagged;
    let tag = tag.to_string();
    match tag.trim_start_matches('!') {
        "include" => {
            let relative = tag_argument(&tag, value)?;
            loader.load(&base.join(relative))
        }
        "includes" => {
            let serde_yaml::Value::Sequence(paths) = value else {
                return Err(Error::InvalidValue(format!("{tag} expects a sequence of paths")));
            };
            let mut loaded = Vec::with_capacity(paths.len());
            for path in paths {
                let relative = tag_argument(&tag, path)?;
                loaded.push(loader.load(&base.join(relative))?);
            }
            Ok(Value::List(loaded.into()))
        }
        "env" => {
            let name = tag_argument(&tag, value)?;
            std::env::var(&name)
                .map(Value::Str)
                .map_err(|_| Error::EnvNotSet(name))
        }
        _ => convert(value, loader, base),
    }
}

fn tag_argument(tag: &str, value: serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        other => Err(Error::InvalidValue(format!("{tag} expects a string, found {other:?}"))),
    }
}

fn key_text(key: serde_yaml::Value) -> Result<String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        other => Err(Error::InvalidValue(format!("unsupported mapping key {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, ErrorKind};
    use crate::io::Format;
    use crate::NestedDict;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_include_relative_to_file() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("parts")).unwrap();
        fs::write(dir.path().join("parts/model.json"), r#"{"layers": 4}"#).unwrap();
        fs::write(dir.path().join("parts/extra.yaml"), "lr: 0.1\n").unwrap();
        fs::write(
            dir.path().join("main.yaml"),
            "model: !include parts/model.json\nall: !includes [parts/model.json, parts/extra.yaml]\n",
        )
        .unwrap();

        let dict = NestedDict::load(dir.path().join("main.yaml")).unwrap();
        assert_eq!(dict.get("model.layers").unwrap(), 4);
        let all = dict.get("all").unwrap().as_list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get(1).unwrap().as_storage().unwrap().get_opt("lr").unwrap(), 0.1);
    }

    #[test]
    fn test_include_cycle_is_detected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "b: !include b.yaml\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "a: !include a.yaml\n").unwrap();

        let err = NestedDict::load(dir.path().join("a.yaml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircularReference);
    }

    #[test]
    fn test_env_tag() {
        let dict = NestedDict::parse("cargo: !env CARGO_PKG_NAME\n", Format::Yaml).unwrap();
        assert_eq!(dict.get("cargo").unwrap(), env!("CARGO_PKG_NAME"));

        let err = NestedDict::parse("x: !env DRAGON_CONFIG_SURELY_UNSET\n", Format::Yaml).unwrap_err();
        assert!(matches!(err, Error::EnvNotSet(name) if name == "DRAGON_CONFIG_SURELY_UNSET"));
    }

    #[test]
    fn test_unknown_tags_pass_through() {
        let dict = NestedDict::parse("x: !custom 3\n", Format::Yaml).unwrap();
        assert_eq!(dict.get("x").unwrap(), 3);
    }
}
