use std::fs;

use assert_matches::assert_matches;
use serde_json::{Map, Value, json};

use crabbit::merge::{MergeOutcome, Patient, VirtualPopulation, VpopMerger};

fn load(name: &str) -> VirtualPopulation {
    let path = format!("tests/fixtures/{name}");
    let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    VirtualPopulation::from_json(name, &raw).unwrap()
}

fn fixture(name: &str) -> Value {
    serde_json::from_str(&fs::read_to_string(format!("tests/fixtures/{name}")).unwrap()).unwrap()
}

#[test]
fn merge_vpop_fixtures() {
    let merged = VpopMerger::merge(&[load("small-vpop-3.json"), load("small-vpop-5.json")])
        .merged()
        .unwrap();
    assert_eq!(merged.patients.len(), 7);
    assert_eq!(merged.to_json(), fixture("merged-vpop.json"));
}

#[test]
fn single_vpop_is_returned_unchanged() {
    let vpop = load("small-vpop-5.json");
    let merged = VpopMerger::merge(std::slice::from_ref(&vpop)).merged().unwrap();
    assert_eq!(merged, vpop);
    assert_eq!(merged.to_json(), fixture("small-vpop-5.json"));
}

#[test]
fn disjoint_vpops_concatenate_in_order() {
    let weight = |val: f64| {
        let mut values = Map::new();
        values.insert(
            "patientAttributes".to_string(),
            json!([{"id": "weight", "val": val}]),
        );
        values
    };
    let a = VirtualPopulation::new(
        "a",
        vec![Patient::new("b1", weight(1.0)), Patient::new("a1", weight(2.0))],
    );
    let b = VirtualPopulation::new("b", vec![Patient::new("c1", weight(3.0))]);
    let merged = VpopMerger::merge(&[a, b]).merged().unwrap();
    let ids: Vec<&str> = merged.patients.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["b1", "a1", "c1"]);
}

#[test]
fn redefined_patient_is_a_conflict() {
    let outcome =
        VpopMerger::merge(&[load("small-vpop-3.json"), load("small-vpop-conflict.json")]);
    assert_matches!(outcome, MergeOutcome::Conflict(conflict) => {
        assert_eq!(conflict.artifact, "patient p2");
        assert!(conflict.reason.contains("small-vpop-conflict.json"));
    });
}

#[test]
fn bare_array_vpops_stay_bare() {
    let a = VirtualPopulation::from_json("a", &json!([{"patientId": "x", "k": 1}])).unwrap();
    let b = VirtualPopulation::from_json("b", &json!([{"patientId": "y", "k": 2}])).unwrap();
    let merged = VpopMerger::merge(&[a, b]).merged().unwrap();
    assert_eq!(
        merged.to_json(),
        json!([{"patientId": "x", "k": 1}, {"patientId": "y", "k": 2}])
    );
}

#[test]
fn numeric_and_text_ids_are_different_patients() {
    let a = VirtualPopulation::from_json("a", &json!([{"patientIndex": 3, "k": 1}])).unwrap();
    let b = VirtualPopulation::from_json("b", &json!([{"patientIndex": "3", "k": 2}])).unwrap();
    let merged = VpopMerger::merge(&[a, b]).merged().unwrap();
    assert_eq!(
        merged.to_json(),
        json!([{"patientIndex": 3, "k": 1}, {"patientIndex": "3", "k": 2}])
    );
}

#[test]
fn same_numeric_id_is_deduplicated() {
    let a = VirtualPopulation::from_json("a", &json!([{"patientIndex": 3, "k": 1}])).unwrap();
    let b = VirtualPopulation::from_json("b", &json!([{"patientIndex": 3, "k": 1}])).unwrap();
    let merged = VpopMerger::merge(&[a, b]).merged().unwrap();
    assert_eq!(merged.patients.len(), 1);
}
