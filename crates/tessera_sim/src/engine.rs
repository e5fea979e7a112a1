//! Query execution.
//!
//! A read computes its result set once, on the first submission that gets
//! past the simulated memory budget, then hands it out in rounds sized by
//! the bound buffers. When the schema sets a tile capacity, a round only
//! ever contains whole tiles of that many cells.

use crate::error::{SimError, SimResult};
use crate::model::{datatype_size, FieldShape, Scalar, SchemaDef};
use crate::storage::{Cell, Storage};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::slice;
use tessera_sys::*;
use tracing::{debug, trace};

/// Ranges per dimension; an empty list selects the whole dimension.
#[derive(Debug, Clone)]
pub(crate) struct SubarrayDef {
    pub(crate) dims: Vec<u32>,
    pub(crate) ranges: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl SubarrayDef {
    pub(crate) fn for_schema(schema: &SchemaDef) -> Self {
        let dims: Vec<u32> = schema.dims().iter().map(|d| d.datatype).collect();
        Self {
            ranges: vec![Vec::new(); dims.len()],
            dims,
        }
    }

    /// Width in bytes of one coordinate of dimension `idx`.
    pub(crate) fn coord_size(&self, idx: u32) -> SimResult<usize> {
        let datatype = *self
            .dims
            .get(idx as usize)
            .ok_or_else(|| SimError::invalid(format!("dimension index {idx} is out of bounds")))?;
        if crate::model::is_string(datatype) {
            return Err(SimError::invalid("ranges on string dimensions are not supported"));
        }
        datatype_size(datatype)
    }

    pub(crate) fn add_range(&mut self, idx: u32, start: Vec<u8>, end: Vec<u8>) -> SimResult<()> {
        let datatype = self.dims[idx as usize];
        if Scalar::decode(datatype, &start).order(&Scalar::decode(datatype, &end)) == Ordering::Greater {
            return Err(SimError::invalid(format!("range on dimension {idx} has start above end")));
        }
        self.ranges[idx as usize].push((start, end));
        Ok(())
    }

    pub(crate) fn range_num(&self, idx: u32) -> SimResult<u64> {
        let ranges = self
            .ranges
            .get(idx as usize)
            .ok_or_else(|| SimError::invalid(format!("dimension index {idx} is out of bounds")))?;
        Ok(ranges.len().max(1) as u64)
    }

    fn selects(&self, coords: &[&[u8]]) -> bool {
        self.ranges.iter().zip(&self.dims).zip(coords).all(|((ranges, &dt), coord)| {
            ranges.is_empty()
                || ranges.iter().any(|(lo, hi)| {
                    let value = Scalar::decode(dt, coord);
                    value.order(&Scalar::decode(dt, lo)) != Ordering::Less
                        && value.order(&Scalar::decode(dt, hi)) != Ordering::Greater
                })
        })
    }
}

/// A condition expression.
#[derive(Debug, Clone)]
pub(crate) enum Condition {
    Compare { field: String, value: Vec<u8>, op: u32 },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub(crate) fn compare(field: String, value: Vec<u8>, op: u32) -> SimResult<Self> {
        if op > TESSERA_NE {
            return Err(SimError::invalid(format!("unknown comparison operator {op}")));
        }
        Ok(Self::Compare { field, value, op })
    }

    pub(crate) fn combine(left: Self, right: Self, op: u32) -> SimResult<Self> {
        match op {
            TESSERA_AND => Ok(Self::And(Box::new(left), Box::new(right))),
            TESSERA_OR => Ok(Self::Or(Box::new(left), Box::new(right))),
            TESSERA_NOT => Err(SimError::invalid("NOT is not a binary combination; negate instead")),
            other => Err(SimError::invalid(format!("unknown combination operator {other}"))),
        }
    }

    fn validate(&self, schema: &SchemaDef) -> SimResult<()> {
        match self {
            Self::Compare { field, value, .. } => {
                let shape = schema
                    .field(field)
                    .ok_or_else(|| SimError::invalid(format!("condition field '{field}' is not in the schema")))?;
                match shape.cell_bytes() {
                    Some(width) if width != value.len() => Err(SimError::invalid(format!(
                        "condition on '{field}' compares {} bytes with {width}-byte cells",
                        value.len()
                    ))),
                    _ => Ok(()),
                }
            }
            Self::And(l, r) | Self::Or(l, r) => {
                l.validate(schema)?;
                r.validate(schema)
            }
            Self::Not(inner) => inner.validate(schema),
        }
    }

    fn matches(&self, schema: &SchemaDef, cell: &Cell) -> bool {
        match self {
            Self::Compare { field, value, op } => {
                let Some(Some(bytes)) = cell.get(field) else {
                    return false;
                };
                let datatype = schema.field(field).map_or(TESSERA_BLOB, |s| s.datatype);
                let ord = Scalar::decode(datatype, bytes).order(&Scalar::decode(datatype, value));
                match *op {
                    TESSERA_LT => ord == Ordering::Less,
                    TESSERA_LE => ord != Ordering::Greater,
                    TESSERA_GT => ord == Ordering::Greater,
                    TESSERA_GE => ord != Ordering::Less,
                    TESSERA_EQ => ord == Ordering::Equal,
                    _ => ord != Ordering::Equal,
                }
            }
            Self::And(l, r) => l.matches(schema, cell) && r.matches(schema, cell),
            Self::Or(l, r) => l.matches(schema, cell) || r.matches(schema, cell),
            Self::Not(inner) => !inner.matches(schema, cell),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ConditionObj {
    pub(crate) condition: Option<Condition>,
}

/// A caller-owned buffer: its start and the address of its byte-size cell.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBuf {
    data: usize,
    size: usize,
}

impl RawBuf {
    pub(crate) fn new<T>(data: *mut T, size: *mut u64) -> SimResult<Self> {
        if data.is_null() {
            return Err(SimError::Null("buffer"));
        }
        if size.is_null() {
            return Err(SimError::Null("buffer size"));
        }
        Ok(Self {
            data: data as usize,
            size: size as usize,
        })
    }

    /// The byte count the caller reports.
    ///
    /// # Safety
    ///
    /// The caller keeps bound buffers and their size cells alive and in place
    /// while the query can be submitted.
    unsafe fn len(&self) -> usize {
        *(self.size as *const u64) as usize
    }

    unsafe fn set_len(&self, bytes: usize) {
        *(self.size as *mut u64) = bytes as u64;
    }

    unsafe fn bytes<'a>(self) -> &'a [u8] {
        slice::from_raw_parts(self.data as *const u8, self.len())
    }

    unsafe fn write(&self, at: usize, bytes: &[u8]) {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), (self.data as *mut u8).add(at), bytes.len());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Bound {
    pub(crate) data: Option<RawBuf>,
    pub(crate) offsets: Option<RawBuf>,
    pub(crate) validity: Option<RawBuf>,
}

impl Bound {
    fn parts(&self) -> impl Iterator<Item = RawBuf> {
        [self.data, self.offsets, self.validity].into_iter().flatten()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AggregateDef {
    pub(crate) op: u32,
    pub(crate) input: Option<String>,
    pub(crate) shape: FieldShape,
}

#[derive(Debug)]
pub(crate) struct QueryObj {
    pub(crate) uri: String,
    pub(crate) query_type: u32,
    pub(crate) layout: u32,
    pub(crate) schema: SchemaDef,
    pub(crate) subarray: Option<SubarrayDef>,
    pub(crate) condition: Option<Condition>,
    pub(crate) buffers: BTreeMap<String, Bound>,
    pub(crate) aggregates: BTreeMap<String, AggregateDef>,
    pub(crate) status: u32,
    pub(crate) reason: u32,
    pub(crate) has_results: bool,
    pub(crate) stall_rounds: u32,
    submissions: u32,
    results: Option<Vec<Cell>>,
    cursor: usize,
}

impl QueryObj {
    pub(crate) fn new(uri: String, query_type: u32, schema: SchemaDef, stall_rounds: u32) -> Self {
        Self {
            uri,
            query_type,
            layout: TESSERA_ROW_MAJOR,
            schema,
            subarray: None,
            condition: None,
            buffers: BTreeMap::new(),
            aggregates: BTreeMap::new(),
            status: TESSERA_UNINITIALIZED,
            reason: TESSERA_REASON_NONE,
            has_results: false,
            stall_rounds: if query_type == TESSERA_READ { stall_rounds } else { 0 },
            submissions: 0,
            results: None,
            cursor: 0,
        }
    }

    /// Shape of a dimension, attribute or aggregate output.
    pub(crate) fn field_shape(&self, name: &str) -> SimResult<FieldShape> {
        self.schema
            .field(name)
            .or_else(|| self.aggregates.get(name).map(|a| a.shape))
            .ok_or_else(|| SimError::invalid(format!("query has no field named '{name}'")))
    }

    /// Output shape of `op` over `input`.
    pub(crate) fn aggregate_shape(&self, op: u32, input: Option<&str>) -> SimResult<FieldShape> {
        let single = |datatype| FieldShape {
            datatype,
            cell_val_num: 1,
            nullable: false,
        };
        if op == TESSERA_AGGREGATE_COUNT {
            return Ok(single(TESSERA_UINT64));
        }
        let name = input.ok_or_else(|| SimError::invalid(format!("aggregate {op} needs an input field")))?;
        let shape = self.schema.field(name).ok_or_else(|| {
            SimError::invalid(format!("aggregate input '{name}' is not in the schema"))
        })?;
        if shape.is_var() {
            return Err(SimError::invalid(format!("aggregate input '{name}' is variable-length")));
        }
        match op {
            TESSERA_AGGREGATE_SUM => Ok(single(match shape.datatype {
                TESSERA_FLOAT32 | TESSERA_FLOAT64 => TESSERA_FLOAT64,
                TESSERA_UINT8 | TESSERA_UINT16 | TESSERA_UINT32 | TESSERA_UINT64 | TESSERA_BOOL => TESSERA_UINT64,
                _ => TESSERA_INT64,
            })),
            TESSERA_AGGREGATE_MIN | TESSERA_AGGREGATE_MAX => Ok(single(shape.datatype)),
            other => Err(SimError::invalid(format!("unknown aggregate operator {other}"))),
        }
    }

    /// Binds one part of `name`'s buffers.
    pub(crate) fn bind(&mut self, name: &str, part: BufferPart, buf: RawBuf) -> SimResult<()> {
        let shape = self.field_shape(name)?;
        match part {
            BufferPart::Offsets if !shape.is_var() => {
                return Err(SimError::invalid(format!("field '{name}' is fixed-length and takes no offsets")))
            }
            BufferPart::Validity if !shape.nullable => {
                return Err(SimError::invalid(format!("field '{name}' is not nullable and takes no validity")))
            }
            _ => {}
        }
        let bound = self.buffers.entry(name.to_owned()).or_default();
        match part {
            BufferPart::Data => bound.data = Some(buf),
            BufferPart::Offsets => bound.offsets = Some(buf),
            BufferPart::Validity => bound.validity = Some(buf),
        }
        Ok(())
    }

    /// Runs one submission; a failure leaves the query `Failed`.
    pub(crate) fn submit(&mut self, storage: &mut Storage) -> SimResult<()> {
        if matches!(self.status, TESSERA_COMPLETED | TESSERA_FAILED) {
            return Err(SimError::state("query already reached a terminal status"));
        }
        let outcome = if self.query_type == TESSERA_WRITE {
            self.submit_write(storage)
        } else {
            self.submit_read(storage)
        };
        if let Err(err) = &outcome {
            debug!(uri = %self.uri, %err, "query failed");
            self.status = TESSERA_FAILED;
            self.reason = TESSERA_REASON_NONE;
            self.has_results = false;
        }
        outcome
    }

    fn require_parts(&self, name: &str, bound: Option<&Bound>, shape: FieldShape) -> SimResult<()> {
        let bound = bound.copied().unwrap_or_default();
        if bound.data.is_none() {
            return Err(SimError::invalid(format!("field '{name}' has no data buffer")));
        }
        if shape.is_var() && bound.offsets.is_none() {
            return Err(SimError::invalid(format!(
                "field '{name}' is variable-length and needs an offsets buffer"
            )));
        }
        if shape.nullable && bound.validity.is_none() {
            return Err(SimError::invalid(format!("field '{name}' is nullable and needs a validity buffer")));
        }
        Ok(())
    }

    fn submit_write(&mut self, storage: &mut Storage) -> SimResult<()> {
        let fields = self.schema.fields();
        let mut columns: Vec<(String, FieldShape, Vec<Option<Vec<u8>>>)> = Vec::with_capacity(fields.len());
        for (name, shape) in fields {
            self.require_parts(&name, self.buffers.get(&name), shape)?;
            let bound = self.buffers[&name];
            // SAFETY: bound buffers stay alive and in place while the query exists.
            let values = unsafe { read_column(&name, shape, &bound)? };
            columns.push((name, shape, values));
        }
        let count = columns.first().map_or(0, |c| c.2.len());
        if let Some((name, _, values)) = columns.iter().find(|c| c.2.len() != count) {
            return Err(SimError::invalid(format!(
                "field '{name}' has {} cells, expected {count}",
                values.len()
            )));
        }

        let dims = self.schema.dims();
        let mut cells = Vec::with_capacity(count);
        for i in 0..count {
            let mut cell = Cell::new();
            for (name, _, values) in &columns {
                cell.insert(name.clone(), values[i].clone());
            }
            for dim in dims {
                let coord = cell.get(dim.name()).and_then(Option::as_deref).unwrap_or_default();
                if !dim.contains(coord) {
                    return Err(SimError::invalid(format!(
                        "cell {i} has a coordinate outside the domain of '{}'",
                        dim.name()
                    )));
                }
            }
            cells.push(cell);
        }

        let array = storage.array_mut(&self.uri)?;
        array.cells.extend(cells);
        array.fragments += 1;
        debug!(uri = %self.uri, cells = count, fragments = array.fragments, "wrote fragment");
        self.status = TESSERA_COMPLETED;
        self.reason = TESSERA_REASON_NONE;
        self.has_results = false;
        Ok(())
    }

    fn submit_read(&mut self, storage: &Storage) -> SimResult<()> {
        self.submissions += 1;
        if self.submissions <= self.stall_rounds {
            // SAFETY: bound buffers stay alive and in place while the query exists.
            unsafe { self.zero_sizes() };
            self.status = TESSERA_INCOMPLETE;
            self.reason = TESSERA_REASON_MEMORY_BUDGET;
            self.has_results = false;
            trace!(round = self.submissions, "stalled on memory budget");
            return Ok(());
        }

        if self.buffers.is_empty() {
            return Err(SimError::invalid("read query has no buffers set"));
        }
        for (name, bound) in &self.buffers {
            let shape = self.field_shape(name)?;
            self.require_parts(name, Some(bound), shape)?;
        }
        if self.results.is_none() {
            self.results = Some(self.collect(storage)?);
        }

        if !self.aggregates.is_empty() {
            // SAFETY: as above.
            unsafe { self.fill_aggregates()? };
            self.status = TESSERA_COMPLETED;
            self.reason = TESSERA_REASON_NONE;
            self.has_results = true;
            return Ok(());
        }

        // SAFETY: as above.
        let delivered = unsafe { self.fill_round() };
        let total = self.results.as_ref().map_or(0, Vec::len);
        self.has_results = delivered > 0;
        if self.cursor == total {
            self.status = TESSERA_COMPLETED;
            self.reason = TESSERA_REASON_NONE;
        } else {
            self.status = TESSERA_INCOMPLETE;
            self.reason = TESSERA_REASON_USER_BUFFER_SIZE;
        }
        trace!(delivered, cursor = self.cursor, total, "read round");
        Ok(())
    }

    /// Bytes of data, offsets and validity a complete read of `name` takes.
    ///
    /// Counts every selected cell, including those already delivered.
    pub(crate) fn estimate(&self, name: &str, storage: &Storage) -> SimResult<[u64; 3]> {
        if self.query_type != TESSERA_READ {
            return Err(SimError::state("only read queries estimate result sizes"));
        }
        let shape = self.field_shape(name)?;
        if self.aggregates.contains_key(name) {
            return Ok([shape.cell_bytes().unwrap_or(0) as u64, 0, 0]);
        }
        let collected;
        let cells = match &self.results {
            Some(results) => results,
            None => {
                collected = self.collect(storage)?;
                &collected
            }
        };
        let width = shape.cell_bytes().unwrap_or(0);
        let data: usize = cells
            .iter()
            .map(|cell| cell.get(name).and_then(Option::as_ref).map_or(width, Vec::len))
            .sum();
        let count = cells.len() as u64;
        let offsets = if shape.is_var() { count * 8 } else { 0 };
        let validity = if shape.nullable { count } else { 0 };
        Ok([data as u64, offsets, validity])
    }

    unsafe fn zero_sizes(&self) {
        for buf in self.buffers.values().flat_map(Bound::parts) {
            buf.set_len(0);
        }
    }

    /// Selected cells, sorted by the query layout.
    fn collect(&self, storage: &Storage) -> SimResult<Vec<Cell>> {
        if let Some(condition) = &self.condition {
            condition.validate(&self.schema)?;
        }
        let stored = storage.array(&self.uri)?;
        let dims = self.schema.dims();
        let coords = |cell: &Cell| -> Vec<Vec<u8>> {
            dims.iter()
                .map(|d| cell.get(d.name()).cloned().flatten().unwrap_or_default())
                .collect()
        };

        let mut cells: Vec<Cell> = stored
            .cells
            .iter()
            .filter(|cell| {
                let coords = coords(*cell);
                let refs: Vec<&[u8]> = coords.iter().map(Vec::as_slice).collect();
                self.subarray.as_ref().map_or(true, |s| s.selects(&refs))
                    && self.condition.as_ref().map_or(true, |c| c.matches(&self.schema, *cell))
            })
            .cloned()
            .collect();

        let mut order: Vec<usize> = (0..dims.len()).collect();
        if self.layout == TESSERA_COL_MAJOR {
            order.reverse();
        }
        cells.sort_by(|a, b| {
            let (ca, cb) = (coords(a), coords(b));
            order
                .iter()
                .map(|&i| Scalar::decode(dims[i].datatype, &ca[i]).order(&Scalar::decode(dims[i].datatype, &cb[i])))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        debug!(uri = %self.uri, cells = cells.len(), "computed read results");
        Ok(cells)
    }

    /// Writes as many whole tiles as fit; returns the cells delivered.
    unsafe fn fill_round(&mut self) -> usize {
        let Some(results) = self.results.as_ref() else {
            return 0;
        };
        let tile = self.schema.capacity.map_or(1, |c| c.max(1) as usize);
        let plans: Vec<FieldPlan> = self
            .buffers
            .iter()
            .filter_map(|(name, bound)| {
                let shape = self.field_shape(name).ok()?;
                Some(FieldPlan::new(name, shape, *bound))
            })
            .collect();

        let mut end = self.cursor;
        let mut used: Vec<Usage> = vec![Usage::default(); plans.len()];
        'tiles: while end < results.len() {
            let next = (end + tile).min(results.len());
            let mut trial = used.clone();
            for (plan, usage) in plans.iter().zip(trial.iter_mut()) {
                for cell in &results[end..next] {
                    usage.add(plan, cell);
                }
                if !usage.fits(plan) {
                    break 'tiles;
                }
            }
            used = trial;
            end = next;
        }

        for plan in &plans {
            plan.write(&results[self.cursor..end]);
        }
        let delivered = end - self.cursor;
        self.cursor = end;
        delivered
    }

    unsafe fn fill_aggregates(&self) -> SimResult<()> {
        let results = self.results.as_deref().unwrap_or_default();
        for (name, bound) in &self.buffers {
            let Some(aggregate) = self.aggregates.get(name) else {
                for buf in bound.parts() {
                    buf.set_len(0);
                }
                continue;
            };
            let Some(data) = bound.data else { continue };
            let value = self.aggregate(aggregate, results);
            if data.len() < value.len() {
                return Err(SimError::invalid(format!(
                    "buffer for aggregate '{name}' is smaller than {} bytes",
                    value.len()
                )));
            }
            data.write(0, &value);
            data.set_len(value.len());
        }
        Ok(())
    }

    fn aggregate(&self, aggregate: &AggregateDef, cells: &[Cell]) -> Vec<u8> {
        if aggregate.op == TESSERA_AGGREGATE_COUNT {
            return (cells.len() as u64).to_ne_bytes().to_vec();
        }
        let Some(input) = aggregate.input.as_deref() else {
            return Vec::new();
        };
        let input_type = self.schema.field(input).map_or(TESSERA_BLOB, |s| s.datatype);
        let values = cells
            .iter()
            .filter_map(|cell| cell.get(input).and_then(Option::as_deref));
        match aggregate.op {
            TESSERA_AGGREGATE_SUM => {
                let mut int_sum = 0i128;
                let mut float_sum = 0f64;
                for bytes in values {
                    match Scalar::decode(input_type, bytes) {
                        Scalar::Int(v) => int_sum += v,
                        Scalar::Float(v) => float_sum += v,
                        Scalar::Bytes(_) => {}
                    }
                }
                match aggregate.shape.datatype {
                    TESSERA_FLOAT64 => float_sum.to_ne_bytes().to_vec(),
                    TESSERA_UINT64 => (int_sum as u64).to_ne_bytes().to_vec(),
                    _ => (int_sum as i64).to_ne_bytes().to_vec(),
                }
            }
            op => {
                let wanted = if op == TESSERA_AGGREGATE_MIN {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                values
                    .reduce(|best, bytes| {
                        if Scalar::decode(input_type, bytes).order(&Scalar::decode(input_type, best)) == wanted {
                            bytes
                        } else {
                            best
                        }
                    })
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default()
            }
        }
    }
}

/// Which buffer of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferPart {
    Data,
    Offsets,
    Validity,
}

/// Reads the cells a write query was given for one field.
unsafe fn read_column(name: &str, shape: FieldShape, bound: &Bound) -> SimResult<Vec<Option<Vec<u8>>>> {
    let data = bound.data.map(|b| b.bytes()).unwrap_or_default();
    let values: Vec<Vec<u8>> = match shape.cell_bytes() {
        Some(width) => {
            if width == 0 || data.len() % width != 0 {
                return Err(SimError::invalid(format!(
                    "data of field '{name}' is not a whole number of {width}-byte cells"
                )));
            }
            data.chunks_exact(width).map(<[u8]>::to_vec).collect()
        }
        None => {
            let raw = bound.offsets.map(|b| b.bytes()).unwrap_or_default();
            let offsets: Vec<u64> = raw
                .chunks_exact(8)
                .map(|c| u64::from_ne_bytes(c.try_into().unwrap_or_default()))
                .collect();
            let mut values = Vec::with_capacity(offsets.len());
            for (i, &start) in offsets.iter().enumerate() {
                let end = offsets.get(i + 1).copied().unwrap_or(data.len() as u64);
                if start > end || end > data.len() as u64 {
                    return Err(SimError::invalid(format!(
                        "offsets of field '{name}' are out of order or past the data"
                    )));
                }
                values.push(data[start as usize..end as usize].to_vec());
            }
            values
        }
    };
    if !shape.nullable {
        return Ok(values.into_iter().map(Some).collect());
    }
    let validity = bound.validity.map(|b| b.bytes()).unwrap_or_default();
    if validity.len() != values.len() {
        return Err(SimError::invalid(format!(
            "field '{name}' has {} validity bytes for {} cells",
            validity.len(),
            values.len()
        )));
    }
    Ok(values
        .into_iter()
        .zip(validity)
        .map(|(value, valid)| (*valid != 0).then_some(value))
        .collect())
}

struct FieldPlan {
    name: String,
    shape: FieldShape,
    bound: Bound,
    caps: Usage,
}

#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    data: usize,
    offsets: usize,
    validity: usize,
}

impl Usage {
    fn add(&mut self, plan: &FieldPlan, cell: &Cell) {
        self.data += plan.cell_value(cell).len();
        if plan.bound.offsets.is_some() {
            self.offsets += 8;
        }
        if plan.bound.validity.is_some() {
            self.validity += 1;
        }
    }

    fn fits(&self, plan: &FieldPlan) -> bool {
        self.data <= plan.caps.data && self.offsets <= plan.caps.offsets && self.validity <= plan.caps.validity
    }
}

impl FieldPlan {
    unsafe fn new(name: &str, shape: FieldShape, bound: Bound) -> Self {
        let cap = |buf: Option<RawBuf>| buf.map_or(0, |b| b.len());
        Self {
            name: name.to_owned(),
            shape,
            bound,
            caps: Usage {
                data: cap(bound.data),
                offsets: cap(bound.offsets),
                validity: cap(bound.validity),
            },
        }
    }

    /// Bytes the field contributes for `cell`; a null fixed-length cell
    /// still takes its width in zeros.
    fn cell_value(&self, cell: &Cell) -> Vec<u8> {
        match cell.get(&self.name).cloned().flatten() {
            Some(value) => value,
            None => vec![0; self.shape.cell_bytes().unwrap_or(0)],
        }
    }

    unsafe fn write(&self, cells: &[Cell]) {
        let mut data_len = 0;
        for (i, cell) in cells.iter().enumerate() {
            let value = self.cell_value(cell);
            if let Some(offsets) = self.bound.offsets {
                offsets.write(i * 8, &(data_len as u64).to_ne_bytes());
            }
            if let Some(validity) = self.bound.validity {
                let valid = cell.get(&self.name).is_some_and(Option::is_some);
                validity.write(i, &[u8::from(valid)]);
            }
            if let Some(data) = self.bound.data {
                data.write(data_len, &value);
            }
            data_len += value.len();
        }
        if let Some(data) = self.bound.data {
            data.set_len(data_len);
        }
        if let Some(offsets) = self.bound.offsets {
            offsets.set_len(cells.len() * 8);
        }
        if let Some(validity) = self.bound.validity {
            validity.set_len(cells.len());
        }
    }
}

#[derive(Debug)]
pub(crate) struct FieldObj {
    pub(crate) query: usize,
    pub(crate) shape: FieldShape,
}

#[derive(Debug)]
pub(crate) struct ChannelObj {
    pub(crate) query: usize,
}

#[derive(Debug)]
pub(crate) struct OperationObj {
    pub(crate) op: u32,
    pub(crate) input: Option<String>,
    pub(crate) shape: FieldShape,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDef, DimensionDef, DomainDef};

    fn schema(capacity: Option<u64>) -> SchemaDef {
        let mut schema = SchemaDef::new(TESSERA_SPARSE).unwrap();
        let mut domain = DomainDef::default();
        domain
            .add(
                DimensionDef::new("d", TESSERA_INT32, Some((1i32.to_ne_bytes().to_vec(), 100i32.to_ne_bytes().to_vec())))
                    .unwrap(),
            )
            .unwrap();
        schema.domain = Some(domain);
        schema.add_attribute(AttributeDef::new("a", TESSERA_INT32).unwrap()).unwrap();
        schema.capacity = capacity;
        schema
    }

    fn storage_with(uri: &str, schema: &SchemaDef, rows: &[i32]) -> Storage {
        let mut storage = Storage::new();
        storage.create_array(uri, schema.clone()).unwrap();
        let array = storage.array_mut(uri).unwrap();
        for &row in rows {
            let mut cell = Cell::new();
            cell.insert("d".into(), Some(row.to_ne_bytes().to_vec()));
            cell.insert("a".into(), Some((row * 10).to_ne_bytes().to_vec()));
            array.cells.push(cell);
        }
        storage
    }

    struct Buf {
        data: Vec<i32>,
        size: u64,
    }

    impl Buf {
        fn new(n: usize) -> Box<Self> {
            Box::new(Self {
                data: vec![0; n],
                size: (n * 4) as u64,
            })
        }

        fn raw(&mut self) -> RawBuf {
            RawBuf::new(self.data.as_mut_ptr(), &mut self.size).unwrap()
        }

        fn filled(&self) -> &[i32] {
            &self.data[..self.size as usize / 4]
        }
    }

    #[test]
    fn rounds_follow_buffer_capacity() {
        let schema = schema(None);
        let mut storage = storage_with("sim://e", &schema, &[3, 1, 2]);
        let mut query = QueryObj::new("sim://e".into(), TESSERA_READ, schema, 0);
        let mut buf = Buf::new(2);
        query.bind("a", BufferPart::Data, buf.raw()).unwrap();

        query.submit(&mut storage).unwrap();
        assert_eq!(query.status, TESSERA_INCOMPLETE);
        assert_eq!(buf.filled(), &[10, 20]);

        buf.size = 8;
        query.submit(&mut storage).unwrap();
        assert_eq!(query.status, TESSERA_COMPLETED);
        assert_eq!(buf.filled(), &[30]);
        assert!(query.submit(&mut storage).is_err());
    }

    #[test]
    fn whole_tiles_only() {
        let schema = schema(Some(3));
        let mut storage = storage_with("sim://t", &schema, &[1, 2, 3, 4]);
        let mut query = QueryObj::new("sim://t".into(), TESSERA_READ, schema, 0);
        let mut buf = Buf::new(2);
        query.bind("a", BufferPart::Data, buf.raw()).unwrap();

        query.submit(&mut storage).unwrap();
        assert_eq!(query.status, TESSERA_INCOMPLETE);
        assert_eq!(query.reason, TESSERA_REASON_USER_BUFFER_SIZE);
        assert!(!query.has_results);
        assert!(buf.filled().is_empty());
    }

    #[test]
    fn stall_rounds_report_memory_budget() {
        let schema = schema(None);
        let mut storage = storage_with("sim://s", &schema, &[1]);
        let mut query = QueryObj::new("sim://s".into(), TESSERA_READ, schema, 1);
        let mut buf = Buf::new(4);
        query.bind("a", BufferPart::Data, buf.raw()).unwrap();

        query.submit(&mut storage).unwrap();
        assert_eq!(query.reason, TESSERA_REASON_MEMORY_BUDGET);
        assert_eq!(buf.size, 0);
        buf.size = 16;
        query.submit(&mut storage).unwrap();
        assert_eq!(query.status, TESSERA_COMPLETED);
        assert_eq!(buf.filled(), &[10]);
    }

    #[test]
    fn conditions() {
        let cond = Condition::combine(
            Condition::compare("a".into(), 20i32.to_ne_bytes().to_vec(), TESSERA_GE).unwrap(),
            Condition::compare("a".into(), 30i32.to_ne_bytes().to_vec(), TESSERA_LT).unwrap(),
            TESSERA_AND,
        )
        .unwrap();
        let schema = schema(None);
        let mut cell = Cell::new();
        cell.insert("a".into(), Some(20i32.to_ne_bytes().to_vec()));
        assert!(cond.matches(&schema, &cell));
        assert!(!Condition::Not(Box::new(cond.clone())).matches(&schema, &cell));
        cell.insert("a".into(), None);
        assert!(!cond.matches(&schema, &cell));
        assert!(Condition::combine(cond.clone(), cond, TESSERA_NOT).is_err());
    }

    #[test]
    fn aggregate_types() {
        let query = QueryObj::new("sim://x".into(), TESSERA_READ, schema(None), 0);
        assert_eq!(query.aggregate_shape(TESSERA_AGGREGATE_COUNT, None).unwrap().datatype, TESSERA_UINT64);
        assert_eq!(query.aggregate_shape(TESSERA_AGGREGATE_SUM, Some("a")).unwrap().datatype, TESSERA_INT64);
        assert_eq!(query.aggregate_shape(TESSERA_AGGREGATE_MAX, Some("a")).unwrap().datatype, TESSERA_INT32);
        assert!(query.aggregate_shape(TESSERA_AGGREGATE_SUM, None).is_err());
    }
}
