//! Installing into a global registry that already holds a built-in name.

use std::sync::Arc;

use pastcast_core::registry;
use pastcast_search::{install, MockSearchTool, SearchConfig, MOCK_GOOGLE, PERPLEXITY_SEARCH};

#[test]
fn install_reports_conflict_and_repeats_outcome() {
    let tools = registry::search_tools();
    tools
        .register(MOCK_GOOGLE, Arc::new(MockSearchTool::google()))
        .unwrap();

    let err = install(&SearchConfig::default()).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains(MOCK_GOOGLE));
    assert_eq!(tools.names(), vec![MOCK_GOOGLE]);
    assert!(!tools.contains(PERPLEXITY_SEARCH));

    // A later call with a different config returns the first outcome.
    let mut other = SearchConfig::default();
    other.mock_tools = false;
    assert!(install(&other).unwrap_err().is_configuration());
    assert!(!tools.contains(PERPLEXITY_SEARCH));
}
