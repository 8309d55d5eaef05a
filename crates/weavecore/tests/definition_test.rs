use weavecore::{DefinitionError, DefinitionProblem, TaskId, WorkflowDefinition};

const RECON: &str = r#"
workflow:
  modules:
    - name: recon
      tasks:
        - resolve:
            command: dig +short {target}
            arguments:
              target: example.com
              retries: 3
        - probe:
            command: httpx -l {recon:resolve}
            requires: resolve
    - name: report
      tasks:
        - summary:
            command: cat {recon:probe}
            requires:
              - recon:probe
"#;

#[test]
fn parses_modules_tasks_and_requires() {
    let def = WorkflowDefinition::from_yaml("recon", RECON).unwrap();

    assert_eq!(def.name, "recon");
    assert_eq!(def.modules.len(), 2);
    assert_eq!(def.task_count(), 3);

    let resolve = &def.modules[0].tasks[0];
    assert_eq!(resolve.name, "resolve");
    assert_eq!(resolve.command.as_deref(), Some("dig +short {target}"));
    assert_eq!(resolve.arguments.get("retries").map(String::as_str), Some("3"));

    let probe = &def.modules[0].tasks[1];
    assert_eq!(probe.requires, vec!["resolve".to_string()]);

    let summary = &def.modules[1].tasks[0];
    assert_eq!(summary.requires, vec!["recon:probe".to_string()]);
}

#[test]
fn missing_sections_are_reported() {
    let err = WorkflowDefinition::from_yaml("w", "other: 1").unwrap_err();
    assert_eq!(err, DefinitionError::MissingWorkflowSection("w".to_string()));

    let err = WorkflowDefinition::from_yaml("w", "workflow:\n  name: x\n").unwrap_err();
    assert_eq!(err, DefinitionError::MissingModulesSection("w".to_string()));

    let err = WorkflowDefinition::from_yaml("w", "").unwrap_err();
    assert_eq!(err, DefinitionError::MissingWorkflowSection("w".to_string()));
}

#[test]
fn task_without_command_still_parses() {
    let src = "workflow:\n  modules:\n    - name: m\n      tasks:\n        - t:\n            requires: other\n";
    let def = WorkflowDefinition::from_yaml("w", src).unwrap();
    assert_eq!(def.modules[0].tasks[0].command, None);
}

#[test]
fn multi_key_task_entry_is_malformed() {
    let src = "workflow:\n  modules:\n    - name: m\n      tasks:\n        - a:\n            command: x\n          b:\n            command: y\n";
    let err = WorkflowDefinition::from_yaml("w", src).unwrap_err();
    let DefinitionError::Invalid(report) = err else {
        panic!("expected a definition report, got {err:?}");
    };
    assert!(matches!(
        report.problems.as_slice(),
        [DefinitionProblem::MalformedTaskEntry { module, .. }] if module == "m"
    ));
}

#[test]
fn every_malformed_entry_is_reported() {
    let src = "\
workflow:
  modules:
    - name: m
      tasks:
        - ok:
            command: echo ok
        - bad:
            arguments:
              list: [1, 2]
    - name: n
      tasks:
        - 42:
            command: echo number
";
    let err = WorkflowDefinition::from_yaml("w", src).unwrap_err();
    let DefinitionError::Invalid(report) = err else {
        panic!("expected a definition report, got {err:?}");
    };
    let modules: Vec<&str> = report
        .problems
        .iter()
        .filter_map(|p| match p {
            DefinitionProblem::MalformedTaskEntry { module, .. } => Some(module.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(modules, vec!["m", "n"]);
}

#[test]
fn task_id_reference_resolution() {
    assert_eq!(
        TaskId::resolve_reference("recon", "resolve"),
        TaskId::new("recon", "resolve")
    );
    assert_eq!(
        TaskId::resolve_reference("report", "recon:probe"),
        TaskId::new("recon", "probe")
    );
    assert_eq!(TaskId::new("a", "b").to_string(), "a:b");
    assert!("nocolon".parse::<TaskId>().is_err());
}
