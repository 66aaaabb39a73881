use crate::model::Operation;
use chrono::Datelike as _;
use std::collections::BTreeSet;

pub(crate) trait GetYear {
    fn get_year(&self) -> i32;
}

impl GetYear for Operation {
    fn get_year(&self) -> i32 {
        self.time().year()
    }
}

pub trait CheckYearsExt {
    fn get_first_year(&self) -> Option<i32>;

    /// Collect every year later than `year`. Earlier years are expected: they hold the
    /// acquisitions of past tax periods.
    fn check_years(&self, year: i32) -> Result<(), BTreeSet<i32>>;
}

/// Blanket implementation for every slice whose items implement `GetYear`.
impl<T> CheckYearsExt for [T]
where
    T: GetYear,
{
    fn get_first_year(&self) -> Option<i32> {
        self.iter().map(|item| item.get_year()).min()
    }

    fn check_years(&self, year: i32) -> Result<(), BTreeSet<i32>> {
        let errors: BTreeSet<_> = self
            .iter()
            .filter_map(|item| {
                let item_year = item.get_year();

                (item_year > year).then_some(item_year)
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationKind;

    fn op(time: &str) -> Operation {
        Operation::new(
            time.parse().unwrap(),
            "kraken",
            "1".parse().unwrap(),
            "BTC".into(),
            OperationKind::Buy,
        )
        .unwrap()
    }

    #[test]
    fn test_check_years() {
        let ops = vec![
            op("2021-03-01 00:00:00+0000"),
            op("2019-06-01 00:00:00+0000"),
            op("2020-12-31 23:59:59+0000"),
        ];

        assert_eq!(ops.get_first_year(), Some(2019));
        assert_eq!(ops.check_years(2021), Ok(()));
        assert_eq!(ops.check_years(2020), Err(BTreeSet::from([2021])));

        let empty: Vec<Operation> = Vec::new();
        assert_eq!(empty.get_first_year(), None);
    }
}
