use std::fs;

use uo_conformance::{
    HarnessConfig, Verdict, compare_workspace, prepare_workspace, select_fixtures,
};
use uo_fingerprint::{DigestAlgorithm, EXPECTATION_FILE, fingerprint_content, write_expectation};

#[test]
fn authored_expectation_matches_untouched_workspace() {
    let root = tempfile::tempdir().expect("tempdir");
    let fixture = root.path().join("integration/plain_copy");
    fs::create_dir_all(fixture.join("docs")).expect("mkdir");
    fs::write(fixture.join("docs/readme.md"), "# readme\n").expect("write");
    fs::write(fixture.join("data.bin"), [0_u8, 1, 2, 3]).expect("write");

    // Authoring: describe the tree as the subject is expected to leave it.
    let expected = fingerprint_content(&fixture, DigestAlgorithm::Blake2b).expect("describe");
    write_expectation(&fixture.join(EXPECTATION_FILE), &expected).expect("author");

    let cfg = HarnessConfig::default_paths(root.path());
    let selected = select_fixtures(&cfg, &[]).expect("discover");
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].name, "plain_copy");

    let workspace = tempfile::tempdir().expect("workspace");
    assert_eq!(prepare_workspace(workspace.path(), &selected[0].path).expect("seed"), 2);
    let comparison =
        compare_workspace(workspace.path(), &expected, cfg.digest).expect("compare");
    assert_eq!(comparison.verdict, Verdict::Passed);
    assert_eq!(comparison.actual, expected);
}
