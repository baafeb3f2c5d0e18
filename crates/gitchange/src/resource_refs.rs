//! Resource-reference extraction: arbitrary cluster objects become files.
//!
//! Referenced objects are fetched through the dynamic API and handled as
//! unstructured JSON; nothing here binds to a concrete kind at compile time.
//! The extraction itself is pure so it tests without a cluster.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;
use serde_json::Value;

use crate::Error;
use crate::api::{ExtractionStrategy, ResourceRef, StrategyType};
use crate::content::FileEntry;

/// Fetch the referenced object and run its extraction strategy.
///
/// `default_namespace` is the owning object's namespace.
pub async fn fetch_and_extract(
    client: &Client,
    default_namespace: &str,
    resource_ref: &ResourceRef,
) -> Result<Vec<FileEntry>, Error> {
    let namespace = resource_ref
        .namespace
        .as_deref()
        .unwrap_or(default_namespace);

    let (group, version) = match resource_ref.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", resource_ref.api_version.as_str()),
    };
    let gvk = GroupVersionKind::gvk(group, version, &resource_ref.kind);
    let resource = ApiResource::from_gvk(&gvk);

    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &resource);
    let object = api.get(&resource_ref.name).await?;
    let object = serde_json::to_value(&object)
        .map_err(|e| Error::Internal(format!("failed to serialize referenced object: {e}")))?;

    extract(&object, &resource_ref.kind, &resource_ref.strategy)
}

/// Apply an extraction strategy to an unstructured object.
pub fn extract(
    object: &Value,
    kind: &str,
    strategy: &ExtractionStrategy,
) -> Result<Vec<FileEntry>, Error> {
    match strategy.r#type {
        StrategyType::Dump => dump(object, strategy),
        StrategyType::Fields => fields(object, kind, strategy),
        StrategyType::SingleField => single_field(object, kind, strategy),
    }
}

fn dump(object: &Value, strategy: &ExtractionStrategy) -> Result<Vec<FileEntry>, Error> {
    let yaml = serde_yaml::to_string(object)
        .map_err(|e| Error::Internal(format!("failed to render object as YAML: {e}")))?;
    let path = if std::path::Path::new(&strategy.path).extension().is_some() {
        strategy.path.clone()
    } else {
        format!("{}.yaml", strategy.path)
    };
    Ok(vec![FileEntry::new(path, yaml, strategy.write_mode)])
}

fn fields(
    object: &Value,
    kind: &str,
    strategy: &ExtractionStrategy,
) -> Result<Vec<FileEntry>, Error> {
    // BTreeMap gives the lexicographic emission order; the first map in
    // precedence order wins for a duplicated key.
    let mut entries: std::collections::BTreeMap<String, Vec<u8>> = Default::default();
    for (map_name, value) in data_maps(object) {
        if let Value::Object(map) = value {
            for (key, value) in map {
                if !entries.contains_key(key) {
                    entries.insert(key.clone(), decode_value(kind, map_name, value)?);
                }
            }
        }
    }

    Ok(entries
        .into_iter()
        .map(|(key, content)| {
            FileEntry::new(
                format!("{}/{}", strategy.path, key),
                content,
                strategy.write_mode,
            )
        })
        .collect())
}

fn single_field(
    object: &Value,
    kind: &str,
    strategy: &ExtractionStrategy,
) -> Result<Vec<FileEntry>, Error> {
    let field_ref = strategy.field_ref.as_ref().ok_or_else(|| {
        Error::Validation("single-field extraction needs a fieldRef".to_string())
    })?;

    for (map_name, value) in data_maps(object) {
        if let Some(value) = value.get(&field_ref.key) {
            let content = decode_value(kind, map_name, value)?;
            let file_name = field_ref.file_name.as_deref().unwrap_or(&field_ref.key);
            return Ok(vec![FileEntry::new(
                format!("{}/{}", strategy.path, file_name),
                content,
                strategy.write_mode,
            )]);
        }
    }

    Err(Error::FieldNotFound(field_ref.key.clone()))
}

/// The object's data-carrying maps, in lookup precedence order.
fn data_maps(object: &Value) -> impl Iterator<Item = (&'static str, &Value)> {
    ["stringData", "data", "binaryData"]
        .into_iter()
        .filter_map(|name| object.get(name).map(|value| (name, value)))
}

/// Decode one map value. Secret `data` and any `binaryData` are
/// base64-encoded at rest; everything else is taken literally.
fn decode_value(kind: &str, map_name: &str, value: &Value) -> Result<Vec<u8>, Error> {
    let base64_encoded = map_name == "binaryData" || (map_name == "data" && kind == "Secret");
    match value {
        Value::String(s) if base64_encoded => BASE64.decode(s.as_bytes()).map_err(|e| {
            Error::Internal(format!("invalid base64 in {map_name} entry: {e}"))
        }),
        Value::String(s) => Ok(s.clone().into_bytes()),
        other => serde_json::to_vec(other)
            .map_err(|e| Error::Internal(format!("failed to serialize {map_name} entry: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FieldRef, WriteMode};
    use serde_json::json;

    fn strategy(r#type: StrategyType, path: &str, field_ref: Option<FieldRef>) -> ExtractionStrategy {
        ExtractionStrategy {
            r#type,
            path: path.into(),
            write_mode: WriteMode::Overwrite,
            field_ref,
        }
    }

    fn config_map() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "default"},
            "data": {"b.conf": "beta", "a.conf": "alpha"}
        })
    }

    fn secret() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "creds", "namespace": "default"},
            "data": {"password": BASE64.encode("hunter2")},
            "stringData": {"note": "plain"}
        })
    }

    #[test]
    fn dump_appends_yaml_extension_when_missing() {
        let files = extract(
            &config_map(),
            "ConfigMap",
            &strategy(StrategyType::Dump, "exports/settings", None),
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "exports/settings.yaml");
        let yaml = String::from_utf8(files[0].content.clone()).unwrap();
        assert!(yaml.contains("kind: ConfigMap"));
        assert!(yaml.contains("a.conf: alpha"));
    }

    #[test]
    fn dump_keeps_an_explicit_extension() {
        let files = extract(
            &config_map(),
            "ConfigMap",
            &strategy(StrategyType::Dump, "exports/settings.yml", None),
        )
        .unwrap();
        assert_eq!(files[0].path, "exports/settings.yml");
    }

    #[test]
    fn fields_emits_lexicographic_order() {
        let files = extract(
            &config_map(),
            "ConfigMap",
            &strategy(StrategyType::Fields, "cfg", None),
        )
        .unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["cfg/a.conf", "cfg/b.conf"]);
        assert_eq!(files[0].content, b"alpha");
    }

    #[test]
    fn fields_decodes_secret_data() {
        let files = extract(
            &secret(),
            "Secret",
            &strategy(StrategyType::Fields, "secrets", None),
        )
        .unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["secrets/note", "secrets/password"]);
        let password = files.iter().find(|f| f.path.ends_with("password")).unwrap();
        assert_eq!(password.content, b"hunter2");
        let note = files.iter().find(|f| f.path.ends_with("note")).unwrap();
        assert_eq!(note.content, b"plain");
    }

    #[test]
    fn config_map_data_is_not_base64_decoded() {
        let files = extract(
            &config_map(),
            "ConfigMap",
            &strategy(StrategyType::Fields, "cfg", None),
        )
        .unwrap();
        assert_eq!(files[1].content, b"beta");
    }

    #[test]
    fn single_field_picks_the_key() {
        let files = extract(
            &secret(),
            "Secret",
            &strategy(
                StrategyType::SingleField,
                "out",
                Some(FieldRef {
                    key: "password".into(),
                    file_name: None,
                }),
            ),
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "out/password");
        assert_eq!(files[0].content, b"hunter2");
    }

    #[test]
    fn single_field_honors_file_name() {
        let files = extract(
            &secret(),
            "Secret",
            &strategy(
                StrategyType::SingleField,
                "out",
                Some(FieldRef {
                    key: "password".into(),
                    file_name: Some("db-password.txt".into()),
                }),
            ),
        )
        .unwrap();
        assert_eq!(files[0].path, "out/db-password.txt");
    }

    #[test]
    fn single_field_missing_key_is_field_not_found() {
        let err = extract(
            &secret(),
            "Secret",
            &strategy(
                StrategyType::SingleField,
                "out",
                Some(FieldRef {
                    key: "absent".into(),
                    file_name: None,
                }),
            ),
        )
        .unwrap_err();
        assert_eq!(err.reason(), "FieldNotFound");
        assert!(!err.retryable());
    }

    #[test]
    fn single_field_without_field_ref_is_a_validation_error() {
        let err = extract(
            &secret(),
            "Secret",
            &strategy(StrategyType::SingleField, "out", None),
        )
        .unwrap_err();
        assert_eq!(err.reason(), "ValidationError");
    }

    #[test]
    fn string_data_wins_over_data_for_the_same_key() {
        let object = json!({
            "kind": "Secret",
            "data": {"k": BASE64.encode("from-data")},
            "stringData": {"k": "from-string-data"}
        });
        let files = extract(
            &object,
            "Secret",
            &strategy(
                StrategyType::SingleField,
                "out",
                Some(FieldRef { key: "k".into(), file_name: None }),
            ),
        )
        .unwrap();
        assert_eq!(files[0].content, b"from-string-data");
    }
}
