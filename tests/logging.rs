mod common;

use std::path::PathBuf;

use common::test_logger;
use jfr_flame::collect::{Session, WorkerPool};
use jfr_flame::flamegraph::{self, BuilderOptions, FrameTree, FrameType, Options, MAX_LEVEL};
use jfr_flame::recording;
use log::Level;

// The captured logs are global, so everything that validates them runs in this one test.
#[test]
fn warnings() {
    test_logger::init();
    let pool = WorkerPool::new(2);
    let sessions = vec![
        Session::from_input(common::profile(&[("a", 1)])),
        Session::new("lost-run", Some(PathBuf::from("/nonexistent/lost.jfr"))),
    ];
    flamegraph::from_sessions(&pool, sessions, &BuilderOptions::default()).unwrap();
    test_logger::validate(|logs| {
        assert!(logs.iter().any(|log| log.level == Level::Warn
            && log.body.contains("lost-run")
            && log.body.contains("/nonexistent/lost.jfr")));
        assert!(logs
            .iter()
            .any(|log| log.level == Level::Warn && log.body.contains("Ignored 1 sessions")));
    });

    recording::recording_info(Vec::new()).unwrap();
    test_logger::validate(|logs| {
        assert!(logs
            .iter()
            .any(|log| log.level == Level::Warn && log.body.contains("no chunks")));
    });

    let names: Vec<String> = (0..MAX_LEVEL + 1).map(|i| format!("f{}", i)).collect();
    let mut builder = flamegraph::FrameTreeBuilder::default();
    builder.add_event(names.iter().map(|n| (n.as_str(), FrameType::Interpreted)), 1, None);
    let tree: FrameTree = builder.build();
    flamegraph::format_tree(&tree, &Options::default()).unwrap();
    test_logger::validate(|logs| {
        let truncations = logs
            .iter()
            .filter(|log| log.level == Level::Warn && log.body.contains("truncating"))
            .count();
        assert_eq!(truncations, 1);
    });
}
