use crate::data::CanonicalAssembler;
use crate::domain::DataRequest;
use std::sync::Arc;

/// Give `dependent` the parent's stored table for every request in
/// `datas`. Tables are shared by `Arc`; requests without a stored table are
/// skipped. Returns how many tables were shared.
pub fn propagate(
    parent: &CanonicalAssembler,
    dependent: &mut CanonicalAssembler,
    datas: &[Arc<DataRequest>],
) -> usize {
    let mut shared = 0;
    for data in datas {
        if let Some(table) = parent.raw_table(&data.key()) {
            dependent.insert(Arc::clone(data), table);
            shared += 1;
        }
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CanonicalTable;
    use crate::domain::{Product, Resolution};
    use polars::prelude::*;

    fn request(res: &str) -> Arc<DataRequest> {
        let product = Product::new("IB", "AAPL", "USD", "STK", None);
        Arc::new(DataRequest::new("IB", product, Resolution::parse(res).unwrap()))
    }

    #[test]
    fn shares_the_same_table() {
        let daily = request("1d");
        let hourly = request("1h");
        let table = Arc::new(CanonicalTable::from(df!("ts" => &[1i64]).unwrap()));

        let mut parent = CanonicalAssembler::default();
        parent.insert(Arc::clone(&daily), Arc::clone(&table));
        let mut dependent = CanonicalAssembler::default();

        let shared = propagate(&parent, &mut dependent, &[Arc::clone(&daily), hourly]);

        assert_eq!(shared, 1);
        assert_eq!(dependent.len(), 1);
        let received = dependent.raw_table(&daily.key()).unwrap();
        assert!(Arc::ptr_eq(&received, &table));
        assert_eq!(parent.len(), 1);
    }
}
