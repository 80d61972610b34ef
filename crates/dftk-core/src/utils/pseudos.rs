use crate::domain::{DftkError, DftkResult, PseudoFamily, Structure};
use std::collections::BTreeSet;

/// Checks that `pseudos` maps every kind of `structure` to exactly one pseudopotential.
pub fn validate_and_prepare_pseudos_inputs(
    structure: &Structure,
    pseudos: Option<&PseudoFamily>,
) -> DftkResult<PseudoFamily> {
    let Some(pseudos) = pseudos else {
        return Err(DftkError::input_validation(
            "INPUT.PSEUDOS_MISSING",
            "no pseudopotentials were provided",
        ));
    };

    let kinds = structure.kind_names();
    let pseudo_kinds = pseudos.keys().cloned().collect::<BTreeSet<_>>();
    if kinds != pseudo_kinds {
        return Err(DftkError::input_validation(
            "INPUT.PSEUDOS_MISMATCH",
            format!(
                "mismatch between the defined pseudos and the list of kinds of the structure; pseudos: {}; kinds: {}",
                join(&pseudo_kinds),
                join(&kinds)
            ),
        ));
    }

    Ok(pseudos.clone())
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::validate_and_prepare_pseudos_inputs;
    use crate::domain::{PseudoFamily, PseudoPotential, Structure};

    fn water() -> Structure {
        let mut structure =
            Structure::new([[5.29, 0.0, 0.0], [0.0, 5.29, 0.0], [0.0, 0.0, 5.29]]);
        structure.append_atom("H", [0.0, 0.0, 0.0]);
        structure.append_atom("H", [1.0, 0.0, 0.0]);
        structure.append_atom("O", [0.5, 0.5, 0.0]);
        structure
    }

    fn family(kinds: &[&str]) -> PseudoFamily {
        kinds
            .iter()
            .map(|kind| {
                (
                    kind.to_string(),
                    PseudoPotential::new(format!("/pseudos/{kind}.upf")),
                )
            })
            .collect()
    }

    #[test]
    fn matching_kinds_are_accepted() {
        let pseudos = family(&["H", "O"]);
        let prepared = validate_and_prepare_pseudos_inputs(&water(), Some(&pseudos))
            .expect("pseudos should validate");
        assert_eq!(prepared, pseudos);
    }

    #[test]
    fn missing_and_extra_kinds_are_rejected() {
        for kinds in [&["H"][..], &["H", "O", "Si"][..]] {
            let pseudos = family(kinds);
            let error = validate_and_prepare_pseudos_inputs(&water(), Some(&pseudos))
                .expect_err("mismatched pseudos should be rejected");
            assert_eq!(error.placeholder(), "INPUT.PSEUDOS_MISMATCH");
            assert!(error.message().contains("kinds: H, O"));
        }
    }

    #[test]
    fn absent_pseudos_are_rejected() {
        let error = validate_and_prepare_pseudos_inputs(&water(), None)
            .expect_err("absent pseudos should be rejected");
        assert_eq!(error.placeholder(), "INPUT.PSEUDOS_MISSING");
    }
}
