use nova_test_usage::{TestTrace, TestUsageIndex, TraceSink, UsageSnapshot};

use super::{open, usage};

fn ids_snapshot(index: &TestUsageIndex, pairs: &[(&str, &str)]) -> UsageSnapshot {
    pairs
        .iter()
        .map(|(class, method)| {
            (
                index.intern_class(class).unwrap(),
                index.intern_method(method).unwrap(),
            )
        })
        .collect()
}

#[test]
fn first_trace_is_indexed_under_every_method() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    let t1 = index.intern_test("T1").unwrap();
    let mod1 = index.intern_module("Mod1").unwrap();
    let a = index.intern_class("A").unwrap();
    let m1 = index.intern_method("m1").unwrap();
    let m2 = index.intern_method("m2").unwrap();
    let current = ids_snapshot(&index, &[("A", "m1"), ("A", "m2")]);

    assert!(index
        .update_from_test(t1, Some(&current), None, Some(mod1))
        .unwrap());

    assert_eq!(index.test_ids_for_method(a, m1).unwrap(), vec![t1]);
    assert_eq!(index.test_ids_for_method(a, m2).unwrap(), vec![t1]);
    assert_eq!(index.snapshot(t1).unwrap(), Some(current));
    assert_eq!(index.module_ids_for_method(a, m1).unwrap(), vec![mod1]);

    // Continuing: the test stops calling m2.
    let previous = index.snapshot(t1).unwrap();
    let narrowed = ids_snapshot(&index, &[("A", "m1")]);
    assert!(index
        .update_from_test(t1, Some(&narrowed), previous.as_ref(), Some(mod1))
        .unwrap());

    assert_eq!(index.test_ids_for_method(a, m1).unwrap(), vec![t1]);
    assert!(index.test_ids_for_method(a, m2).unwrap().is_empty());
    assert_eq!(index.snapshot(t1).unwrap(), Some(narrowed));
    index.dispose().unwrap();
}

#[test]
fn test_without_trace_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());
    let t2 = index.intern_test("T2").unwrap();
    index.flush().unwrap();
    let before = index.stats().unwrap();

    assert!(!index.update_from_test(t2, None, None, None).unwrap());

    let after = index.stats().unwrap();
    assert_eq!(before, after);
    assert!(after
        .stores
        .iter()
        .all(|store| store.entries == 0 && !store.dirty));
    assert_eq!(index.snapshot(t2).unwrap(), None);
    index.dispose().unwrap();
}

#[test]
fn repeating_a_trace_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());
    let trace = TestTrace::new("FooTest#adds")
        .with_module("app")
        .with_methods("com.example.Foo", ["add", "sub"]);

    assert!(index.update_from_trace(&trace).unwrap());
    index.flush().unwrap();
    let before = index.stats().unwrap();

    assert!(!index.update_from_trace(&trace).unwrap());
    assert_eq!(index.stats().unwrap(), before);
    assert_eq!(
        index.tests_for_method("com.example.Foo", "add").unwrap(),
        ["FooTest#adds"]
    );
    index.dispose().unwrap();
}

#[test]
fn retracted_methods_stop_pointing_at_the_test() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .update_from_trace(
            &TestTrace::new("T")
                .with_methods("A", ["m1", "m2"])
                .with_methods("B", ["x"]),
        )
        .unwrap();
    index
        .update_from_trace(&TestTrace::new("U").with_methods("A", ["m2"]))
        .unwrap();
    index
        .update_from_trace(&TestTrace::new("T").with_methods("A", ["m1"]))
        .unwrap();

    assert_eq!(index.tests_for_method("A", "m1").unwrap(), ["T"]);
    assert_eq!(index.tests_for_method("A", "m2").unwrap(), ["U"]);
    assert!(index.tests_for_method("B", "x").unwrap().is_empty());
    assert_eq!(
        index.usage_of_test("T").unwrap(),
        Some(usage(&[("A", &["m1"])]))
    );

    // Coming back to a retracted method adds the test again.
    index
        .update_from_trace(&TestTrace::new("T").with_methods("B", ["x"]))
        .unwrap();
    assert_eq!(index.tests_for_method("B", "x").unwrap(), ["T"]);
    assert!(index.tests_for_method("A", "m1").unwrap().is_empty());
    index.dispose().unwrap();
}

#[test]
fn empty_trace_clears_a_known_test() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .test_finished(&TestTrace::new("T").with_methods("A", ["m"]))
        .unwrap();
    assert!(index.has_test_trace("T").unwrap());

    index.test_finished(&TestTrace::new("T")).unwrap();
    assert!(!index.has_test_trace("T").unwrap());
    assert_eq!(index.usage_of_test("T").unwrap(), None);
    assert!(index.tests_for_method("A", "m").unwrap().is_empty());

    // Unknown tests without usage are not even interned.
    assert!(!index.update_from_trace(&TestTrace::new("Never")).unwrap());
    let stats = index.stats().unwrap();
    let tests = stats
        .names
        .iter()
        .find(|table| table.file == nova_test_usage::TEST_NAMES_FILE)
        .unwrap();
    assert_eq!(tests.entries, 1);
    index.dispose().unwrap();
}

#[test]
fn remove_test_retracts_everything() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .update_from_trace(&TestTrace::new("T").with_methods("A", ["m1", "m2"]))
        .unwrap();
    assert!(index.remove_test("T").unwrap());
    assert!(!index.remove_test("T").unwrap());
    assert!(!index.remove_test("Unknown").unwrap());

    assert!(index.tests_for_method("A", "m1").unwrap().is_empty());
    assert!(index.tests_for_method("A", "m2").unwrap().is_empty());
    assert!(!index.has_test_trace("T").unwrap());
    index.dispose().unwrap();
}

#[test]
fn modules_are_recorded_under_added_methods() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .update_from_trace(
            &TestTrace::new("T")
                .with_module("core")
                .with_methods("A", ["m"]),
        )
        .unwrap();
    index
        .update_from_trace(
            &TestTrace::new("U")
                .with_module("app")
                .with_methods("A", ["m"]),
        )
        .unwrap();

    assert_eq!(index.modules_for_method("A", "m").unwrap(), ["core", "app"]);
    assert!(index.modules_for_method("A", "missing").unwrap().is_empty());
    assert!(index.modules_for_method("Missing", "m").unwrap().is_empty());
    index.dispose().unwrap();
}

#[test]
fn unknown_names_are_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    assert!(index.tests_for_method("A", "m").unwrap().is_empty());
    assert_eq!(index.usage_of_test("T").unwrap(), None);
    assert!(!index.has_test_trace("T").unwrap());
    index.dispose().unwrap();
}

#[test]
fn dump_resolves_every_entry_to_names() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .update_from_trace(
            &TestTrace::new("T")
                .with_module("core")
                .with_methods("A", ["m1", "m2"]),
        )
        .unwrap();
    index
        .update_from_trace(&TestTrace::new("U").with_methods("A", ["m2"]))
        .unwrap();
    index
        .update_from_trace(&TestTrace::new("T").with_methods("A", ["m2"]))
        .unwrap();

    let dump = index.dump().unwrap();
    assert_eq!(dump.tests.len(), 2);
    assert_eq!(dump.tests["T"], usage(&[("A", &["m2"])]));
    assert!(!dump.methods.contains_key("A#m1"));
    let m2 = &dump.methods["A#m2"];
    assert_eq!(m2.tests.iter().collect::<Vec<_>>(), ["T", "U"]);
    assert!(m2.modules.contains("core"));

    let json = serde_json::to_value(&dump).unwrap();
    assert_eq!(json["tests"]["U"]["A"][0], "m2");
    index.dispose().unwrap();
}
