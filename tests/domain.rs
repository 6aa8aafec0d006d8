use assert_matches::assert_matches;

use crabbit::domain::{
    CalibrationPatient, CalibrationStatus, ProjectItem, ProjectItemUrl, ScalarKind,
};
use crabbit::error::CrabbitError;

#[test]
fn parse_url_normal() {
    let url: ProjectItemUrl = "https://jinko.ai/ca-foo-bar?revision=42".parse().unwrap();
    assert_eq!(url.sid, "ca-foo-bar");
    assert_eq!(url.revision, Some(42));
}

#[test]
fn parse_url_without_revision() {
    let url: ProjectItemUrl = "https://jinko.ai/cm-baz-nix".parse().unwrap();
    assert_eq!(url.sid, "cm-baz-nix");
    assert_eq!(url.revision, None);
}

#[test]
fn parse_url_bad() {
    for bad in ["https://jinko.ai", "https://jinko.ai/one/two", "ca-foo-bar"] {
        let err = bad.parse::<ProjectItemUrl>().unwrap_err();
        assert_matches!(err, CrabbitError::InvalidProjectItemUrl(_));
    }
}

#[test]
fn parse_url_localhost() {
    let url: ProjectItemUrl = "http://localhost:8000/cm-bla-bla?revision=1".parse().unwrap();
    assert_eq!(url.sid, "cm-bla-bla");
    assert_eq!(url.revision, Some(1));
    assert_eq!(url.to_string(), "cm-bla-bla?revision=1");
}

#[test]
fn calibration_status_values() {
    assert_eq!(CalibrationStatus::parse("not_launched"), CalibrationStatus::NotLaunched);
    assert_eq!(CalibrationStatus::parse("completed"), CalibrationStatus::Completed);
    assert_eq!(CalibrationStatus::parse("stopped"), CalibrationStatus::Other);
}

#[test]
fn project_item_reads_type_and_core_id() {
    let item: ProjectItem = serde_json::from_str(
        r#"{"type": "Calibration", "coreId": {"id": "c1", "snapshotId": "s1"}, "sid": "ca-x-y"}"#,
    )
    .unwrap();
    assert_eq!(item.item_type.as_deref(), Some("Calibration"));
    assert_eq!(item.core_id.unwrap().snapshot_id, "s1");
}

#[test]
fn project_item_version_label() {
    let named: ProjectItem =
        serde_json::from_str(r#"{"type": "ComputationalModel", "version": {"label": "v2"}}"#)
            .unwrap();
    assert_eq!(named.version_label(), Some("v2"));

    let unnamed: ProjectItem =
        serde_json::from_str(r#"{"type": "ComputationalModel", "version": {"label": ""}}"#)
            .unwrap();
    assert_eq!(unnamed.version_label(), None);
}

#[test]
fn calibration_patient_number_as_string_or_integer() {
    let text: CalibrationPatient =
        serde_json::from_str(r#"{"patientNumber": "17", "iteration": 4}"#).unwrap();
    let integer: CalibrationPatient =
        serde_json::from_str(r#"{"patientNumber": 17, "iteration": 4}"#).unwrap();
    assert_eq!(text, integer);
    assert_eq!(integer.patient_number, "17");

    let missing = r#"{"patientNumber": null, "iteration": 4}"#;
    assert!(serde_json::from_str::<CalibrationPatient>(missing).is_err());
}

#[test]
fn scalar_kind_layout() {
    assert_eq!(ScalarKind::Scalar.array_dir(), "ScalarArrays");
    assert_eq!(ScalarKind::Categorical.values_field(), "categoricalLevels");
    assert!(ScalarKind::Scalar.carries_units());
    assert_eq!(ScalarKind::Categorical.to_string(), "categorical");
}
