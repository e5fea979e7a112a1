//! Ownership and buffer-negotiation properties of the safe layer, checked
//! against the in-process engine.

use proptest::prelude::*;
use tessera::{Batch, Error, IncompleteDriver, IncompleteReason, Progress, Query, QueryStatus, QueryType};
use tessera_testkit::prelude::*;
use tessera_testkit::native_addr;

/// Everything read back from a var-sized fixture, cell by cell.
#[derive(Debug, Default, PartialEq)]
struct ReadBack {
    a1: Vec<Vec<i32>>,
    n: Vec<Option<i32>>,
}

impl ReadBack {
    fn extend(&mut self, batch: &Batch) {
        let a1 = batch.field("a1").expect("a1 bound");
        self.a1.extend(a1.var_cells::<i32>().expect("a1 cells"));
        let n = batch.field("n").expect("n bound");
        let values = n.data::<i32>().expect("n values");
        self.n
            .extend(values.into_iter().enumerate().map(|(i, v)| n.is_valid(i).then_some(v)));
    }

    fn expected(cells: &[VarCell]) -> Self {
        Self {
            a1: cells.iter().map(|(_, values, _)| values.clone()).collect(),
            n: cells.iter().map(|(_, _, n)| *n).collect(),
        }
    }
}

fn bind_var(query: &Query, data: usize, offsets: usize, cells: usize) {
    query.set_data_buffer("a1", vec![0i32; data]).unwrap();
    query.set_offsets_buffer("a1", vec![0u64; offsets]).unwrap();
    query.set_data_buffer("n", vec![0i32; cells]).unwrap();
    query.set_validity_buffer("n", vec![0u8; cells]).unwrap();
}

fn check_offset_law(batch: &Batch) {
    let a1 = batch.field("a1").unwrap();
    let offsets = a1.offsets().unwrap();
    let data_bytes = a1.data_bytes().len() as u64;
    assert_eq!(data_bytes % 4, 0);
    if let Some(first) = offsets.first() {
        assert_eq!(*first, 0);
    }
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    assert!(offsets.iter().all(|&o| o <= data_bytes));
    assert_eq!(offsets.len(), batch.field("n").unwrap().cell_count());
}

#[test]
fn children_outlive_dropped_parents() {
    init_tracing();
    let fixture = TestArray::int(None);
    let ctx_addr = native_addr!(fixture.ctx());
    let array = fixture.open(QueryType::Read);
    let array_addr = native_addr!(array);
    let query = Query::new(&array, QueryType::Read).unwrap();
    let query_addr = native_addr!(query);
    let field = query.field("a").unwrap();
    let field_addr = native_addr!(field);

    drop(array);
    assert!(tessera_sim::is_live(array_addr));
    drop(query);
    assert!(tessera_sim::is_live(query_addr));
    assert!(field.nullable().is_ok());

    drop(field);
    assert!(!tessera_sim::is_live(field_addr));
    assert!(!tessera_sim::is_live(query_addr));
    assert!(!tessera_sim::is_live(array_addr));
    assert!(tessera_sim::freed_before(field_addr, query_addr));
    assert!(tessera_sim::freed_before(query_addr, array_addr));

    drop(fixture);
    assert!(tessera_sim::freed_before(array_addr, ctx_addr));
    for addr in [field_addr, query_addr, array_addr, ctx_addr] {
        assert!(tessera_sim::violations_for(addr).is_empty());
    }
}

#[test]
fn every_resource_is_freed_once() {
    let fixture = TestArray::int(None);
    let array = fixture.open(QueryType::Read);
    let addr = native_addr!(array);
    let copy = array.clone();

    array.handle().release();
    array.handle().release();
    copy.handle().release();
    assert!(copy.handle().is_released());
    drop(array);
    drop(copy);

    assert_eq!(tessera_sim::free_count(addr), 1);
    assert!(tessera_sim::violations_for(addr).is_empty());
}

#[test]
fn guard_blocks_release() {
    let fixture = TestArray::int(None);
    let array = fixture.open(QueryType::Read);
    let addr = native_addr!(array);

    let guard = array.handle().acquire().unwrap();
    array.handle().release();
    assert!(tessera_sim::is_live(addr));
    assert_eq!(array.handle().outstanding_guards(), 1);
    assert!(matches!(array.handle().acquire(), Err(Error::Released { .. })));
    assert!(matches!(array.is_open(), Err(Error::Released { .. })));

    drop(guard);
    assert!(!tessera_sim::is_live(addr));
    assert_eq!(tessera_sim::free_count(addr), 1);
}

#[test]
fn one_two_three_grows_until_complete() {
    init_tracing();
    let fixture = scenarios::one_two_three();
    let query = fixture.read_query();
    query.set_data_buffer("a1", vec![0i32; 1]).unwrap();
    query.set_offsets_buffer("a1", vec![0u64; 1]).unwrap();

    // The single tile needs three offsets and six values; nothing fits.
    assert_eq!(query.submit().unwrap(), QueryStatus::Incomplete);
    assert_eq!(query.status_details().unwrap(), IncompleteReason::UserBufferSize);
    assert_eq!(query.result_counts("a1").unwrap(), Default::default());
    assert!(query.results().unwrap().is_empty());

    let mut driver = IncompleteDriver::new(&query);
    let batch = loop {
        match driver.step().unwrap() {
            Progress::Complete(batch) => break batch,
            Progress::Resized(resized) => assert!(resized.iter().all(|r| r.to > r.from)),
            other => panic!("unexpected progress: {other:?}"),
        }
    };
    assert_eq!(query.status().unwrap(), QueryStatus::Completed);

    let a1 = batch.field("a1").unwrap();
    assert_eq!(a1.offsets().unwrap(), &[0, 4, 12]);
    assert_eq!(a1.data::<i32>().unwrap(), vec![1, 2, 2, 3, 3, 3]);
    assert_eq!(driver.summary().cells["a1"], 3);
}

#[test]
fn nullable_values_round_trip() {
    let fixture = scenarios::one_two_three();
    let query = fixture.read_query();
    bind_var(&query, 16, 4, 4);
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);

    let n = query.result("n").unwrap();
    assert_eq!(n.validity().unwrap(), &[1, 0, 1]);
    assert!(n.is_valid(0) && !n.is_valid(1));
    let values = n.data::<i32>().unwrap();
    assert_eq!((values[0], values[2]), (10, 30));
}

#[test]
fn terminal_query_refuses_resubmit() {
    let fixture = scenarios::counted(2);
    let query = fixture.read_query();
    query.set_data_buffer("a", vec![0i32; 4]).unwrap();
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    assert!(matches!(query.submit(), Err(Error::Usage { .. })));
}

#[tokio::test]
async fn async_submit_delivers_results() {
    let fixture = scenarios::counted(3);
    let query = fixture.read_query();
    query.set_data_buffer("a", vec![0i32; 8]).unwrap();
    assert_eq!(query.submit_async().await.unwrap(), QueryStatus::Completed);
    assert_eq!(query.result("a").unwrap().data::<i32>().unwrap(), vec![1, 2, 3]);
}

#[test]
fn empty_cells_read_back_empty() {
    let fixture = TestArray::var_sized(None);
    let cells: Vec<VarCell> = vec![(1, vec![7], Some(1)), (2, vec![], None), (3, vec![], Some(3))];
    fixture.write_var(&cells);

    let (back, _) = read_chunked(&fixture, 1);
    assert_eq!(back.a1, vec![vec![7], vec![], vec![]]);
    assert_eq!(back, ReadBack::expected(&cells));
    assert_eq!(read_single_shot(&fixture, &cells), back);
}

fn read_chunked(fixture: &TestArray, initial: usize) -> (ReadBack, Vec<tessera::Resize>) {
    let query = fixture.read_query();
    bind_var(&query, initial, initial, initial);
    let mut back = ReadBack::default();
    let mut resizes = Vec::new();
    let mut driver = IncompleteDriver::new(&query);
    loop {
        match driver.step().unwrap() {
            Progress::Partial(batch) => {
                check_offset_law(&batch);
                back.extend(&batch);
            }
            Progress::Complete(batch) => {
                check_offset_law(&batch);
                back.extend(&batch);
                break;
            }
            Progress::Resized(resized) => resizes.extend(resized),
            Progress::Retry(reason) => panic!("unexpected retry: {reason}"),
        }
    }
    (back, resizes)
}

fn read_single_shot(fixture: &TestArray, cells: &[VarCell]) -> ReadBack {
    let values: usize = cells.iter().map(|(_, v, _)| v.len()).sum();
    let query = fixture.read_query();
    // Read buffers cannot be empty, even when every cell is.
    bind_var(&query, values.max(1), cells.len(), cells.len());
    assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
    let mut back = ReadBack::default();
    back.extend(&query.results().unwrap());
    back
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chunked_reads_match_single_shot(
        cells in var_cells_strategy(12, 5),
        initial in buffer_elements_strategy(),
        capacity in capacity_strategy(),
    ) {
        let fixture = TestArray::var_sized(capacity);
        fixture.write_var(&cells);

        let (chunked, resizes) = read_chunked(&fixture, initial);
        let single = read_single_shot(&fixture, &cells);

        prop_assert!(resizes.iter().all(|r| r.to > r.from));
        prop_assert_eq!(&chunked, &single);
        prop_assert_eq!(chunked, ReadBack::expected(&cells));
    }
}
