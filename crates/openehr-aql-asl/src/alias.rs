//! Query aliases

use std::collections::HashMap;

/// Hands out unique aliases for the queries of one compilation.
///
/// Every prefix has its own counter starting at 0, so `unique_alias("pd")` yields
/// `pd_0`, `pd_1`, ... The provider lives exactly as long as one compilation.
#[derive(Debug, Default)]
pub struct AliasProvider {
    counters: HashMap<String, u32>,
}

impl AliasProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next alias for `prefix`
    pub fn unique_alias(&mut self, prefix: &str) -> String {
        let counter = self
            .counters
            .entry(prefix.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(0);
        format!("{prefix}_{counter}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counter_per_prefix() {
        let mut aliases = AliasProvider::new();
        assert_eq!(aliases.unique_alias("pd"), "pd_0");
        assert_eq!(aliases.unique_alias("pd"), "pd_1");
        assert_eq!(aliases.unique_alias("sCO_c"), "sCO_c_0");
        assert_eq!(aliases.unique_alias("pd"), "pd_2");
    }

    #[test]
    fn test_fresh_provider_restarts() {
        let mut first = AliasProvider::new();
        let mut second = AliasProvider::new();
        first.unique_alias("p_eq");
        assert_eq!(second.unique_alias("p_eq"), "p_eq_0");
    }
}
