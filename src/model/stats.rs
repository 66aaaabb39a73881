#[derive(Debug, Default)]
pub struct Stats {
    n_ledger_files: usize,
    n_ledger_rows: usize,
    n_assets: usize,
    n_tax_events: usize,
    n_residual_lots: usize,
}

impl Stats {
    pub fn inc_ledger_files(&mut self) {
        self.n_ledger_files += 1;
    }

    pub fn inc_ledgers(&mut self) {
        self.n_ledger_rows += 1;
    }

    pub fn inc_assets(&mut self) {
        self.n_assets += 1;
    }

    pub fn add_tax_events(&mut self, count: usize) {
        self.n_tax_events += count;
    }

    pub fn add_residual_lots(&mut self, count: usize) {
        self.n_residual_lots += count;
    }

    pub fn ledger_rows(&self) -> usize {
        self.n_ledger_rows
    }

    pub fn pretty_print(&self) {
        println!("{self:#?}");
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_not_truncated() {
        let mut stats = Stats::default();
        stats.add_tax_events(i32::MAX as usize);
        stats.add_tax_events(2);
        stats.add_residual_lots(3);

        assert_eq!(stats.n_tax_events, i32::MAX as usize + 2);
        assert_eq!(stats.n_residual_lots, 3);
    }
}
