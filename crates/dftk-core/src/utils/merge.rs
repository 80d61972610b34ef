use serde_json::Value;

/// Recursively merges `overrides` into `base`.
///
/// Objects are merged key by key; any other value in `overrides`, arrays
/// included, replaces the value in `base`.
pub fn merge_parameters(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_parameters(existing, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::merge_parameters;
    use serde_json::json;

    #[test]
    fn caller_values_win_on_leaf_conflicts() {
        let mut base = json!({
            "scf": { "checkpointfile": "scfres.jld2", "$kwargs": { "maxtime": 540 } },
            "postscf": []
        });
        let overrides = json!({
            "scf": { "$kwargs": { "maxiter": 100, "maxtime": 30 } },
            "postscf": [{ "$function": "compute_forces_cart" }]
        });

        merge_parameters(&mut base, &overrides);

        assert_eq!(
            base,
            json!({
                "scf": {
                    "checkpointfile": "scfres.jld2",
                    "$kwargs": { "maxtime": 30, "maxiter": 100 }
                },
                "postscf": [{ "$function": "compute_forces_cart" }]
            })
        );
    }

    #[test]
    fn non_object_override_replaces_nested_record() {
        let mut base = json!({ "model_kwargs": { "temperature": 0.001 } });
        merge_parameters(&mut base, &json!({ "model_kwargs": null }));
        assert_eq!(base, json!({ "model_kwargs": null }));
    }

    #[test]
    fn empty_override_leaves_base_untouched() {
        let original = json!({ "basis_kwargs": { "Ecut": 10 } });
        let mut base = original.clone();
        merge_parameters(&mut base, &json!({}));
        assert_eq!(base, original);
    }
}
