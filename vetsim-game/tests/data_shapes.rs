//! Shape validation for the embedded catalog content.

use std::collections::BTreeSet;

use vetsim_game::CaseCatalog;

#[test]
fn builtin_catalog_parses_with_content() {
    let catalog = CaseCatalog::builtin();
    assert!(catalog.cases.len() >= 2, "catalog ships multiple cases");
    assert!(catalog.tests.len() >= 5, "catalog ships multiple tests");
}

#[test]
fn every_case_answer_references_declared_options() {
    for case in &CaseCatalog::builtin().cases {
        assert!(
            case.diagnosis_by_id(&case.correct_diagnosis).is_some(),
            "case {} correct diagnosis {} missing from its option list",
            case.id,
            case.correct_diagnosis
        );
        assert!(
            !case.correct_treatments.is_empty(),
            "case {} has no correct treatments",
            case.id
        );
        for treatment in &case.correct_treatments {
            assert!(
                case.treatment_by_id(treatment).is_some(),
                "case {} correct treatment {treatment} missing from its option list",
                case.id
            );
        }
        assert!(case.budget_cents > 0, "case {} has no budget", case.id);
        assert!(
            case.diagnoses.len() >= 2,
            "case {} offers no real diagnostic choice",
            case.id
        );
    }
}

#[test]
fn case_and_test_ids_are_unique() {
    let catalog = CaseCatalog::builtin();
    let case_ids: BTreeSet<&str> = catalog.cases.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(case_ids.len(), catalog.cases.len());
    let test_ids: BTreeSet<&str> = catalog.tests.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(test_ids.len(), catalog.tests.len());
}

#[test]
fn reference_intervals_are_well_formed() {
    for test in &CaseCatalog::builtin().tests {
        assert!(test.cost_cents > 0, "test {} is free", test.id);
        assert!(test.duration_minutes > 0, "test {} takes no time", test.id);
        for spec in &test.measurements {
            assert!(
                spec.normal_low < spec.normal_high,
                "test {} measurement {} has an inverted interval",
                test.id,
                spec.label
            );
        }
    }
}

#[test]
fn catalog_round_trips_through_json() {
    let catalog = CaseCatalog::builtin();
    let raw = serde_json::to_string(catalog).unwrap();
    let restored = CaseCatalog::from_json(&raw).unwrap();
    assert_eq!(&restored, catalog);
}
