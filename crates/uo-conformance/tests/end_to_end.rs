#![cfg(unix)]

use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use uo_conformance::{
    BuildCommand, BuildResolutionError, CaseStatus, EntryDiff, FailureReason, Fixture, Harness,
    HarnessConfig, HarnessError, Stage, SuiteEvent, render_case_detail, render_case_line,
    run_conformance,
};
use uo_fingerprint::{DigestAlgorithm, EXPECTATION_FILE, Entry, digest_bytes};

struct Sandbox {
    root: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir(root.path().join("fixtures")).expect("mkdir");
        fs::create_dir(root.path().join("scratch")).expect("mkdir");
        Self { root }
    }

    fn fixtures(&self) -> PathBuf {
        self.root.path().join("fixtures")
    }

    fn scratch(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    /// Subject script; `$ws` holds the workspace (always the last argument).
    fn subject(&self, body: &str) -> PathBuf {
        let path = self.root.path().join("subject.sh");
        fs::write(&path, format!("#!/bin/sh\nfor ws; do :; done\n{body}\n")).expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn fixture(&self, name: &str, files: &[(&str, &[u8])], expectation: &str) -> PathBuf {
        let path = self.fixtures().join(name);
        for (relative, bytes) in files {
            let file = path.join(relative);
            fs::create_dir_all(file.parent().expect("parent")).expect("mkdir");
            fs::write(file, bytes).expect("write");
        }
        fs::create_dir_all(&path).expect("mkdir");
        fs::write(path.join(EXPECTATION_FILE), expectation).expect("write");
        path
    }

    fn config(&self, subject: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::with_fixture_root(self.root.path(), self.fixtures());
        config.subject = Some(subject.to_path_buf());
        config.scratch_parent = Some(self.scratch());
        config
    }

    fn scratch_is_empty(&self) -> bool {
        fs::read_dir(self.scratch()).expect("list").count() == 0
    }
}

fn blake(bytes: &[u8]) -> String {
    digest_bytes(bytes, DigestAlgorithm::Blake2b)
}

fn hello_expectation() -> String {
    format!("{{\n  \"hello.txt\": \"{}\"\n}}", blake(b"hi"))
}

#[test]
fn unmodified_copy_passes() {
    let sandbox = Sandbox::new();
    let fixture = sandbox.fixture("hello", &[("hello.txt", b"hi")], &hello_expectation());
    let harness = Harness::init(sandbox.config(&sandbox.subject("exit 0"))).expect("init");

    let result = harness.run_fixture(&Fixture::new(&fixture));
    assert_eq!(result.status, CaseStatus::Passed, "{result:?}");
    assert_eq!(render_case_line(&result), "Testing hello...PASSED");
    assert!(sandbox.scratch_is_empty(), "workspace discarded after the run");
    assert!(fixture.join(EXPECTATION_FILE).is_file(), "fixture untouched");
}

#[test]
fn failing_subject_reports_execution_error() {
    let sandbox = Sandbox::new();
    let fixture = sandbox.fixture("broken", &[("hello.txt", b"hi")], &hello_expectation());
    let subject = sandbox.subject("echo 'corrupt archive' >&2\nexit 1");
    let harness = Harness::init(sandbox.config(&subject)).expect("init");

    let result = harness.run_fixture(&Fixture::new(&fixture));
    assert_eq!(
        result.status,
        CaseStatus::Failed {
            reason: FailureReason::Execution {
                code: 1,
                output: "corrupt archive\n".to_owned(),
            }
        }
    );
    assert!(
        render_case_detail(&result)
            .expect("detail")
            .contains("corrupt archive")
    );
    assert!(sandbox.scratch_is_empty());
}

#[test]
fn extra_file_is_a_mismatch_with_actual_fingerprint() {
    let sandbox = Sandbox::new();
    let fixture = sandbox.fixture("extra", &[("hello.txt", b"hi")], &hello_expectation());
    let subject = sandbox.subject(r#"printf 'leftover' > "$ws/extra.txt""#);
    let harness = Harness::init(sandbox.config(&subject)).expect("init");

    let result = harness.run_fixture(&Fixture::new(&fixture));
    let CaseStatus::Failed {
        reason: FailureReason::Mismatch { actual, diff },
    } = &result.status
    else {
        panic!("expected mismatch, got {result:?}");
    };
    assert_eq!(actual.get("extra.txt"), Some(&Entry::Digest(blake(b"leftover"))));
    assert_eq!(actual.get("hello.txt"), Some(&Entry::Digest(blake(b"hi"))));
    assert_eq!(
        diff,
        &vec![EntryDiff::Added {
            path: "extra.txt".to_owned()
        }]
    );
}

#[test]
fn unpacking_subject_matches_nested_expectation() {
    let sandbox = Sandbox::new();
    let expectation = format!(
        "{{\"out\": {{\"content.txt\": \"{}\", \"empty\": {{}}}}}}",
        blake(b"unpacked payload")
    );
    let fixture = sandbox.fixture("moved", &[("archive.bin", b"unpacked payload")], &expectation);
    let subject = sandbox.subject(
        r#"mkdir -p "$ws/out/empty" && mv "$ws/archive.bin" "$ws/out/content.txt""#,
    );
    let harness = Harness::init(sandbox.config(&subject)).expect("init");

    let first = harness.run_fixture(&Fixture::new(&fixture));
    let second = harness.run_fixture(&Fixture::new(&fixture));
    assert!(first.passed(), "{first:?}");
    assert_eq!(first.status, second.status, "same verdict on every run");
}

#[test]
fn missing_expectation_is_errored_and_run_continues() {
    let sandbox = Sandbox::new();
    fs::create_dir(sandbox.fixtures().join("no_doc")).expect("mkdir");
    sandbox.fixture("hello", &[("hello.txt", b"hi")], &hello_expectation());
    let config = sandbox.config(&sandbox.subject("exit 0"));

    let report = run_conformance(config, &[], |_| {}).expect("run");
    assert_eq!(report.fixture_count, 2);
    assert_eq!(report.passed, 1);
    assert!(!report.all_passed());
    let errored = &report.results[1];
    assert_eq!(errored.fixture, "no_doc");
    assert!(matches!(
        errored.status,
        CaseStatus::Failed {
            reason: FailureReason::Errored {
                stage: Stage::Expectation,
                ..
            }
        }
    ));
}

#[test]
fn observer_sees_each_fixture_in_order() {
    let sandbox = Sandbox::new();
    sandbox.fixture("b_second", &[("hello.txt", b"hi")], &hello_expectation());
    sandbox.fixture("a_first", &[("hello.txt", b"hi")], &hello_expectation());
    let config = sandbox.config(&sandbox.subject("exit 0"));

    let events = RefCell::new(Vec::new());
    let report = run_conformance(config, &[], |event| {
        events.borrow_mut().push(match event {
            SuiteEvent::Started(fixture) => format!("start {}", fixture.name),
            SuiteEvent::Finished(result) => render_case_line(result),
        });
    })
    .expect("run");

    assert!(report.all_passed());
    assert_eq!(
        events.into_inner(),
        vec![
            "start a_first",
            "Testing a_first...PASSED",
            "start b_second",
            "Testing b_second...PASSED",
        ]
    );
}

#[test]
fn failed_workspace_is_retained_on_request() {
    let sandbox = Sandbox::new();
    let fixture = sandbox.fixture("extra", &[("hello.txt", b"hi")], &hello_expectation());
    let subject = sandbox.subject(r#"touch "$ws/extra.txt""#);
    let mut config = sandbox.config(&subject);
    config.keep_failed = true;
    let harness = Harness::init(config).expect("init");

    let result = harness.run_fixture(&Fixture::new(&fixture));
    let kept = result.retained_workspace.clone().expect("retained");
    assert!(kept.join("extra.txt").is_file());
    assert!(!kept.join(EXPECTATION_FILE).exists());
    fs::remove_dir_all(kept).expect("cleanup");
}

#[test]
fn subject_gets_a_private_copy_of_the_config_template() {
    let sandbox = Sandbox::new();
    let fixture = sandbox.fixture("cfg", &[("hello.txt", b"hi")], &hello_expectation());
    let template = sandbox.root.path().join("subject-config.json");
    fs::write(&template, "{\"passwords\": []}").expect("write");

    let subject = sandbox.subject(&format!(
        "[ \"$1\" = \"-c\" ] || exit 3\n\
         [ \"$2\" != \"{}\" ] || exit 4\n\
         grep -q passwords \"$2\" || exit 5\n\
         echo '{{\"passwords\": [\"hunter2\"]}}' > \"$2\"",
        template.display()
    ));
    let mut config = sandbox.config(&subject);
    config.subject_config = Some(template.clone());
    let harness = Harness::init(config).expect("init");
    assert!(harness.subject_config_path().is_some());

    let result = harness.run_fixture(&Fixture::new(&fixture));
    assert!(result.passed(), "{:?}", render_case_detail(&result));
    assert_eq!(
        fs::read_to_string(&template).expect("template"),
        "{\"passwords\": []}"
    );
}

#[test]
fn build_resolution_failure_aborts_before_any_fixture() {
    let sandbox = Sandbox::new();
    sandbox.fixture("hello", &[("hello.txt", b"hi")], &hello_expectation());
    let mut config = HarnessConfig::with_fixture_root(sandbox.root.path(), sandbox.fixtures());
    config.build = BuildCommand {
        program: "sh".to_owned(),
        args: vec!["-c".to_owned(), r#"echo '{"reason":"build-finished"}'"#.to_owned()],
        working_dir: None,
    };

    let mut seen = 0;
    let err = run_conformance(config, &[], |_| seen += 1).expect_err("no executable");
    assert!(matches!(
        err,
        HarnessError::BuildResolution(BuildResolutionError::NoExecutable)
    ));
    assert_eq!(seen, 0);
}

#[test]
fn executable_is_resolved_from_the_build_event_stream() {
    let sandbox = Sandbox::new();
    sandbox.fixture("hello", &[("hello.txt", b"hi")], &hello_expectation());
    let subject = sandbox.subject("exit 0");
    let mut config = HarnessConfig::with_fixture_root(sandbox.root.path(), sandbox.fixtures());
    config.scratch_parent = Some(sandbox.scratch());
    config.build = BuildCommand {
        program: "sh".to_owned(),
        args: vec![
            "-c".to_owned(),
            format!(
                r#"echo '{{"reason":"compiler-artifact","executable":null}}'; echo '{{"executable":"{}"}}'"#,
                subject.display()
            ),
        ],
        working_dir: None,
    };

    let report = run_conformance(config, &["hello".to_owned()], |_| {}).expect("run");
    assert_eq!(report.executable, subject);
    assert!(report.all_passed());
}

#[test]
fn unreadable_fixture_is_errored_at_copy() {
    let sandbox = Sandbox::new();
    let fixture = sandbox.fixture("linked", &[("hello.txt", b"hi")], &hello_expectation());
    std::os::unix::fs::symlink(fixture.join("nowhere"), fixture.join("dangling"))
        .expect("symlink");
    let harness = Harness::init(sandbox.config(&sandbox.subject("exit 0"))).expect("init");

    let result = harness.run_fixture(&Fixture::new(&fixture));
    assert!(
        matches!(
            &result.status,
            CaseStatus::Failed {
                reason: FailureReason::Errored {
                    stage: Stage::Copy,
                    ..
                }
            }
        ),
        "{result:?}"
    );
    assert!(sandbox.scratch_is_empty(), "workspace discarded after the error");
}

#[test]
fn dangling_link_left_by_subject_is_errored_at_fingerprint_and_run_continues() {
    let sandbox = Sandbox::new();
    sandbox.fixture(
        "a_dangling",
        &[("hello.txt", b"hi"), ("leave-link", b"")],
        &hello_expectation(),
    );
    sandbox.fixture("b_hello", &[("hello.txt", b"hi")], &hello_expectation());
    let subject = sandbox.subject(
        r#"if [ -e "$ws/leave-link" ]; then
  rm "$ws/leave-link"
  ln -s "$ws/nowhere" "$ws/dangling"
fi"#,
    );

    let report = run_conformance(sandbox.config(&subject), &[], |_| {}).expect("run");
    assert_eq!(report.fixture_count, 2);
    assert_eq!(report.failed, 1);
    let CaseStatus::Failed {
        reason: FailureReason::Errored { stage, message },
    } = &report.results[0].status
    else {
        panic!("expected errored fixture, got {:?}", report.results[0]);
    };
    assert_eq!(*stage, Stage::Fingerprint);
    assert!(message.contains("dangling"), "{message}");
    assert!(report.results[1].passed(), "{:?}", report.results[1]);
    assert!(sandbox.scratch_is_empty());
}
