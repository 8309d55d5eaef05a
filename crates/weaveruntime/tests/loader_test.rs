use std::path::Path;
use weavecore::{DefinitionError, WeaveError};
use weaveruntime::WorkflowCatalog;

fn write_workflow(dir: &Path, name: &str, yaml: &str) {
    let workflow_dir = dir.join(name);
    std::fs::create_dir_all(&workflow_dir).unwrap();
    std::fs::write(workflow_dir.join("workflow_config.yaml"), yaml).unwrap();
}

const RECON: &str = r#"
workflow:
  modules:
    - name: recon
      tasks:
        - resolve:
            command: dig +short {target}
        - probe:
            command: httpx -l {recon:resolve}
            requires: resolve
    - name: report
      tasks:
        - summary:
            command: cat {recon:probe}
            requires: [recon:probe]
"#;

#[test]
fn test_list_summarizes_modules_and_skips_broken_files() {
    let dir = tempfile::tempdir().unwrap();
    write_workflow(dir.path(), "recon", RECON);
    write_workflow(dir.path(), "broken", "workflow: {}\n");
    std::fs::create_dir_all(dir.path().join("not-a-workflow")).unwrap();

    let catalog = WorkflowCatalog::new(dir.path());
    let summaries = catalog.list().unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "recon");
    assert_eq!(
        summaries[0].modules,
        vec![
            ("recon".to_string(), vec!["resolve".to_string(), "probe".to_string()]),
            ("report".to_string(), vec!["summary".to_string()]),
        ]
    );
}

#[test]
fn test_load_parses_definition() {
    let dir = tempfile::tempdir().unwrap();
    write_workflow(dir.path(), "recon", RECON);

    let definition = WorkflowCatalog::new(dir.path()).load("recon").unwrap();
    assert_eq!(definition.name, "recon");
    assert_eq!(definition.task_count(), 3);
    assert_eq!(definition.modules[1].tasks[0].requires, vec!["recon:probe"]);
}

#[test]
fn test_unknown_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = WorkflowCatalog::new(dir.path());

    for name in ["missing", "../etc", ""] {
        let result = catalog.load(name);
        assert!(
            matches!(result, Err(WeaveError::Definition(DefinitionError::WorkflowNotFound(_)))),
            "{name}"
        );
    }
}

#[test]
fn test_missing_directory_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = WorkflowCatalog::new(dir.path().join("nope"));
    assert!(catalog.list().unwrap().is_empty());
}

#[test]
fn test_load_all_reports_every_failing_workflow() {
    let dir = tempfile::tempdir().unwrap();
    write_workflow(dir.path(), "recon", RECON);
    write_workflow(dir.path(), "broken", "workflow: {}\n");

    let catalog = WorkflowCatalog::new(dir.path());
    let result = catalog.load_all(&["recon", "broken", "missing"]);

    match result {
        Err(WeaveError::Definition(DefinitionError::Several(errors))) => {
            assert_eq!(
                errors,
                vec![
                    DefinitionError::MissingModulesSection("broken".to_string()),
                    DefinitionError::WorkflowNotFound("missing".to_string()),
                ]
            );
        }
        other => panic!("expected both failures, got {other:?}"),
    }
    assert_eq!(catalog.load_all(&["recon"]).unwrap().len(), 1);
}
