// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-vertex computation results bound to the fragment they were
//! computed over.
//!
//! An app run leaves behind a [`ContextObject`]: one column (or several
//! named ones) aligned with the owned vertices of the source fragment,
//! or a free-standing tensor. Selectors address the result alongside
//! the graph data it annotates, and the marshalling entry points ship
//! it through the same size-then-body collectives graphs use.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use skein_comm::Collective;
use skein_store::{ObjectId, ObjectStore};

use crate::column::Column;
use crate::columnar::ColumnarFragment;
use crate::error::EngineError;
use crate::marshal;
use crate::selector::{
    parse_labeled_selector_map, parse_selector_map, LabeledSelector, Selector, VertexRange,
};
#[cfg(feature = "dynamic")]
use crate::wrapper::{
    dynamic_owned_rows, dynamic_projected_rows, dynamic_projected_vertex_column,
    dynamic_vertex_column,
};
use crate::wrapper::{
    column_rows, columnar_label_rows, columnar_vertex_column, projected_label_rows,
    projected_vertex_column, FragmentHandle,
};

/// Shape of the data a context holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// A free-standing column with no vertex alignment.
    Tensor,
    /// One value per owned vertex of a simple fragment.
    VertexData,
    /// Named columns per owned vertex of a simple fragment.
    VertexProperty,
    /// One value per owned vertex, keyed by vertex label.
    LabeledVertexData,
    /// Named columns per owned vertex, keyed by vertex label.
    LabeledVertexProperty,
}

impl ContextKind {
    /// Wire name clients match on.
    pub fn name(self) -> &'static str {
        match self {
            Self::Tensor => "tensor",
            Self::VertexData => "vertex_data",
            Self::VertexProperty => "vertex_property",
            Self::LabeledVertexData => "labeled_vertex_data",
            Self::LabeledVertexProperty => "labeled_vertex_property",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
enum ContextData {
    Tensor(Column),
    VertexData(Column),
    VertexProperty(Vec<(String, Column)>),
    LabeledVertexData(BTreeMap<usize, Column>),
    LabeledVertexProperty(BTreeMap<usize, Vec<(String, Column)>>),
}

/// Result of an app run, registered under its own key.
///
/// The context keeps a handle on the fragment it was computed over so
/// selectors can join result columns with vertex ids, and so add-column
/// can verify it is being applied to the graph it came from.
#[derive(Debug, Clone)]
pub struct ContextObject {
    base: FragmentHandle,
    data: ContextData,
}

impl ContextObject {
    /// Wraps a free-standing column. Tensors carry no vertex alignment,
    /// so any base and any length are accepted.
    pub fn tensor(base: FragmentHandle, data: Column) -> Self {
        Self {
            base,
            data: ContextData::Tensor(data),
        }
    }

    /// Wraps one value per owned vertex of a simple fragment.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] when the base is a property graph
    /// or the column length differs from the owned vertex count.
    pub fn vertex_data(base: FragmentHandle, data: Column) -> Result<Self, EngineError> {
        let rows = unlabeled_row_count(&base)?;
        check_rows(&data, rows)?;
        Ok(Self {
            base,
            data: ContextData::VertexData(data),
        })
    }

    /// Wraps named columns per owned vertex of a simple fragment.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] when the base is a property graph
    /// or any column length differs from the owned vertex count.
    pub fn vertex_property(
        base: FragmentHandle,
        columns: Vec<(String, Column)>,
    ) -> Result<Self, EngineError> {
        let rows = unlabeled_row_count(&base)?;
        for (_, data) in &columns {
            check_rows(data, rows)?;
        }
        Ok(Self {
            base,
            data: ContextData::VertexProperty(columns),
        })
    }

    /// Wraps one value per owned vertex for each computed label.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] when the base is not a property
    /// graph, a label id is out of range, or a column length differs
    /// from the label's owned vertex count.
    pub fn labeled_vertex_data(
        base: FragmentHandle,
        per_label: BTreeMap<usize, Column>,
    ) -> Result<Self, EngineError> {
        let frag = labeled_base(&base)?;
        for (&label_id, data) in &per_label {
            check_label_rows(frag, label_id, data)?;
        }
        Ok(Self {
            base,
            data: ContextData::LabeledVertexData(per_label),
        })
    }

    /// Wraps named columns per owned vertex for each computed label.
    ///
    /// # Errors
    /// [`EngineError::InvalidValue`] when the base is not a property
    /// graph, a label id is out of range, or a column length differs
    /// from the label's owned vertex count.
    pub fn labeled_vertex_property(
        base: FragmentHandle,
        per_label: BTreeMap<usize, Vec<(String, Column)>>,
    ) -> Result<Self, EngineError> {
        let frag = labeled_base(&base)?;
        for (&label_id, columns) in &per_label {
            for (_, data) in columns {
                check_label_rows(frag, label_id, data)?;
            }
        }
        Ok(Self {
            base,
            data: ContextData::LabeledVertexProperty(per_label),
        })
    }

    /// Shape of the held data.
    pub fn kind(&self) -> ContextKind {
        match &self.data {
            ContextData::Tensor(_) => ContextKind::Tensor,
            ContextData::VertexData(_) => ContextKind::VertexData,
            ContextData::VertexProperty(_) => ContextKind::VertexProperty,
            ContextData::LabeledVertexData(_) => ContextKind::LabeledVertexData,
            ContextData::LabeledVertexProperty(_) => ContextKind::LabeledVertexProperty,
        }
    }

    /// The fragment this context was computed over.
    pub fn base_handle(&self) -> &FragmentHandle {
        &self.base
    }

    /// Gathers one selected column to the root rank as an ndarray
    /// archive. Non-root ranks contribute and get `None`.
    ///
    /// # Errors
    /// Selector errors, plus [`EngineError::InvalidOperation`] on
    /// tensor contexts, which are addressed by axis instead.
    pub fn to_ndarray(
        &self,
        comm: &dyn Collective,
        selector: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::marshal_ndarray(comm, &column)
    }

    /// Gathers the selected columns to the root rank as a dataframe
    /// archive. Non-root ranks contribute and get `None`.
    ///
    /// # Errors
    /// Selector errors, plus [`EngineError::InvalidOperation`] on
    /// tensor contexts.
    pub fn to_dataframe(
        &self,
        comm: &dyn Collective,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Option<Bytes>, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::marshal_dataframe(comm, &columns)
    }

    /// Writes per-rank tensor chunks of one selected column into the
    /// store and groups them. All ranks return the group id.
    ///
    /// # Errors
    /// Selector and store failures.
    pub fn store_to_tensor(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selector: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let column = self.single_column(selector, range)?;
        marshal::store_ndarray(comm, store, &column, None)
    }

    /// Writes per-rank dataframe chunks of the selected columns into
    /// the store and groups them. All ranks return the group id.
    ///
    /// # Errors
    /// Selector and store failures.
    pub fn store_to_dataframe(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<ObjectId, EngineError> {
        let columns = self.named_columns(selectors, range)?;
        marshal::store_dataframe(comm, store, &columns, None)
    }

    /// Gathers a tensor context along `axis` as an ndarray archive.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] on non-tensor contexts and
    /// [`EngineError::InvalidValue`] for an axis other than zero.
    pub fn tensor_to_ndarray(
        &self,
        comm: &dyn Collective,
        axis: i64,
    ) -> Result<Option<Bytes>, EngineError> {
        let data = self.tensor_data(axis)?;
        marshal::marshal_ndarray(comm, data)
    }

    /// Gathers a tensor context as a one-column dataframe archive.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] on non-tensor contexts.
    pub fn tensor_to_dataframe(
        &self,
        comm: &dyn Collective,
    ) -> Result<Option<Bytes>, EngineError> {
        let data = self.tensor_data(0)?;
        marshal::marshal_dataframe(comm, &[("tensor".to_owned(), data.clone())])
    }

    /// Writes a tensor context into the store along `axis`. All ranks
    /// return the group id.
    ///
    /// # Errors
    /// Same conditions as [`Self::tensor_to_ndarray`], plus store
    /// failures.
    pub fn tensor_store(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
        axis: i64,
    ) -> Result<ObjectId, EngineError> {
        let data = self.tensor_data(axis)?;
        marshal::store_ndarray(comm, store, data, None)
    }

    /// Writes a tensor context into the store as a one-column
    /// dataframe. All ranks return the group id.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] on non-tensor contexts, plus
    /// store failures.
    pub fn tensor_store_dataframe(
        &self,
        comm: &dyn Collective,
        store: &dyn ObjectStore,
    ) -> Result<ObjectId, EngineError> {
        let data = self.tensor_data(0)?;
        marshal::store_dataframe(comm, store, &[("tensor".to_owned(), data.clone())], None)
    }

    /// Result columns to append to a property graph, keyed by vertex
    /// label id. Entries whose selector addresses graph data instead of
    /// the result are skipped; the map key names the new property.
    ///
    /// # Errors
    /// [`EngineError::InvalidOperation`] on tensor contexts,
    /// [`EngineError::NotFound`] for result columns the context does
    /// not hold, [`EngineError::InvalidValue`] for selectors that need
    /// a named column on a single-column context (or vice versa).
    pub fn to_labeled_columns(
        &self,
        selectors: &str,
    ) -> Result<BTreeMap<usize, Vec<(String, Column)>>, EngineError> {
        let mut out: BTreeMap<usize, Vec<(String, Column)>> = BTreeMap::new();
        match &self.data {
            ContextData::Tensor(_) => {
                return Err(EngineError::InvalidOperation(
                    "cannot take columns from a tensor context".into(),
                ))
            }
            ContextData::VertexData(data) => {
                for (name, sel) in parse_selector_map(selectors)? {
                    match sel {
                        Selector::Result => {
                            let label_id = self.projected_label()?;
                            out.entry(label_id).or_default().push((name, data.clone()));
                        }
                        Selector::ResultColumn(col) => {
                            return Err(EngineError::NotFound(format!("result column {col}")))
                        }
                        Selector::VertexId | Selector::VertexData => {}
                    }
                }
            }
            ContextData::VertexProperty(columns) => {
                for (name, sel) in parse_selector_map(selectors)? {
                    match sel {
                        Selector::Result => return Err(needs_named_column()),
                        Selector::ResultColumn(col) => {
                            let Some((_, data)) =
                                columns.iter().find(|(have, _)| *have == col)
                            else {
                                return Err(EngineError::NotFound(format!(
                                    "result column {col}"
                                )));
                            };
                            let label_id = self.projected_label()?;
                            out.entry(label_id).or_default().push((name, data.clone()));
                        }
                        Selector::VertexId | Selector::VertexData => {}
                    }
                }
            }
            ContextData::LabeledVertexData(per_label) => {
                for (name, sel) in parse_labeled_selector_map(selectors)? {
                    match &sel {
                        LabeledSelector::Result { label } => {
                            let (_, label_id) = self.labeled_target(label)?;
                            let Some(data) = per_label.get(&label_id) else {
                                return Err(EngineError::NotFound(format!(
                                    "result for label {label}"
                                )));
                            };
                            out.entry(label_id).or_default().push((name, data.clone()));
                        }
                        LabeledSelector::ResultColumn { label, column } => {
                            return Err(EngineError::NotFound(format!(
                                "result column {label}.{column}"
                            )))
                        }
                        LabeledSelector::VertexId { .. }
                        | LabeledSelector::VertexProperty { .. } => {}
                    }
                }
            }
            ContextData::LabeledVertexProperty(per_label) => {
                for (name, sel) in parse_labeled_selector_map(selectors)? {
                    match &sel {
                        LabeledSelector::Result { .. } => return Err(needs_named_column()),
                        LabeledSelector::ResultColumn { label, column } => {
                            let (_, label_id) = self.labeled_target(label)?;
                            let Some((_, data)) = per_label
                                .get(&label_id)
                                .and_then(|cols| {
                                    cols.iter().find(|(have, _)| have == column)
                                })
                            else {
                                return Err(EngineError::NotFound(format!(
                                    "result column {label}.{column}"
                                )));
                            };
                            out.entry(label_id).or_default().push((name, data.clone()));
                        }
                        LabeledSelector::VertexId { .. }
                        | LabeledSelector::VertexProperty { .. } => {}
                    }
                }
            }
        }
        Ok(out)
    }

    fn tensor_data(&self, axis: i64) -> Result<&Column, EngineError> {
        let ContextData::Tensor(data) = &self.data else {
            return Err(EngineError::InvalidOperation(format!(
                "context kind {} is not a tensor",
                self.kind()
            )));
        };
        if axis != 0 {
            return Err(EngineError::InvalidValue(format!(
                "tensor axis out of range: {axis}"
            )));
        }
        Ok(data)
    }

    fn single_column(&self, selector: &str, range: &VertexRange) -> Result<Column, EngineError> {
        match &self.data {
            ContextData::Tensor(_) => Err(axis_addressed()),
            ContextData::VertexData(_) | ContextData::VertexProperty(_) => {
                let sel = Selector::parse(selector)?;
                let rows = self.unlabeled_rows(range);
                self.unlabeled_column(&sel, &rows)
            }
            ContextData::LabeledVertexData(_) | ContextData::LabeledVertexProperty(_) => {
                let sel = LabeledSelector::parse(selector)?;
                let (frag, label_id) = self.labeled_target(sel.label())?;
                let rows = columnar_label_rows(frag, label_id, range);
                self.labeled_column(frag, &sel, label_id, &rows)
            }
        }
    }

    fn named_columns(
        &self,
        selectors: &str,
        range: &VertexRange,
    ) -> Result<Vec<(String, Column)>, EngineError> {
        match &self.data {
            ContextData::Tensor(_) => Err(axis_addressed()),
            ContextData::VertexData(_) | ContextData::VertexProperty(_) => {
                let parsed = parse_selector_map(selectors)?;
                let rows = self.unlabeled_rows(range);
                parsed
                    .iter()
                    .map(|(name, sel)| Ok((name.clone(), self.unlabeled_column(sel, &rows)?)))
                    .collect()
            }
            ContextData::LabeledVertexData(_) | ContextData::LabeledVertexProperty(_) => {
                let parsed = parse_labeled_selector_map(selectors)?;
                let Some((_, first)) = parsed.first() else {
                    return Ok(Vec::new());
                };
                let label = first.label();
                for (_, sel) in &parsed {
                    if sel.label() != label {
                        return Err(EngineError::InvalidValue(format!(
                            "selectors span multiple labels: {label} and {}",
                            sel.label()
                        )));
                    }
                }
                let (frag, label_id) = self.labeled_target(label)?;
                let rows = columnar_label_rows(frag, label_id, range);
                parsed
                    .iter()
                    .map(|(name, sel)| {
                        Ok((name.clone(), self.labeled_column(frag, sel, label_id, &rows)?))
                    })
                    .collect()
            }
        }
    }

    /// Offsets in owned-vertex order of the base whose oids fall in
    /// `range`. Result and vertex columns share one mask.
    fn unlabeled_rows(&self, range: &VertexRange) -> Vec<usize> {
        match &self.base {
            FragmentHandle::Projected(frag) => projected_label_rows(frag, range),
            #[cfg(feature = "dynamic")]
            FragmentHandle::Dynamic(frag) => dynamic_owned_rows(frag, range),
            #[cfg(feature = "dynamic")]
            FragmentHandle::DynamicView(view) => dynamic_owned_rows(view.base(), range),
            #[cfg(feature = "dynamic")]
            FragmentHandle::DynamicProjected(frag) => dynamic_projected_rows(frag, range),
            FragmentHandle::Columnar(_) => Vec::new(),
        }
    }

    fn unlabeled_column(&self, sel: &Selector, rows: &[usize]) -> Result<Column, EngineError> {
        match sel {
            Selector::Result => match &self.data {
                ContextData::VertexData(data) => column_rows(data, rows),
                _ => Err(needs_named_column()),
            },
            Selector::ResultColumn(col) => match &self.data {
                ContextData::VertexProperty(columns) => {
                    match columns.iter().find(|(have, _)| have == col) {
                        Some((_, data)) => column_rows(data, rows),
                        None => Err(EngineError::NotFound(format!("result column {col}"))),
                    }
                }
                _ => Err(EngineError::NotFound(format!("result column {col}"))),
            },
            vertex => self.base_vertex_column(vertex, rows),
        }
    }

    fn labeled_column(
        &self,
        frag: &ColumnarFragment,
        sel: &LabeledSelector,
        label_id: usize,
        rows: &[usize],
    ) -> Result<Column, EngineError> {
        match sel {
            LabeledSelector::Result { label } => match &self.data {
                ContextData::LabeledVertexData(per_label) => match per_label.get(&label_id) {
                    Some(data) => column_rows(data, rows),
                    None => Err(EngineError::NotFound(format!("result for label {label}"))),
                },
                _ => Err(needs_named_column()),
            },
            LabeledSelector::ResultColumn { label, column } => match &self.data {
                ContextData::LabeledVertexProperty(per_label) => {
                    let found = per_label
                        .get(&label_id)
                        .and_then(|cols| cols.iter().find(|(have, _)| have == column));
                    match found {
                        Some((_, data)) => column_rows(data, rows),
                        None => Err(EngineError::NotFound(format!(
                            "result column {label}.{column}"
                        ))),
                    }
                }
                _ => Err(EngineError::NotFound(format!(
                    "result column {label}.{column}"
                ))),
            },
            vertex => columnar_vertex_column(frag, vertex, label_id, rows),
        }
    }

    fn base_vertex_column(&self, sel: &Selector, rows: &[usize]) -> Result<Column, EngineError> {
        match &self.base {
            FragmentHandle::Projected(frag) => projected_vertex_column(frag, sel, rows),
            #[cfg(feature = "dynamic")]
            FragmentHandle::Dynamic(frag) => dynamic_vertex_column(frag, sel, rows),
            #[cfg(feature = "dynamic")]
            FragmentHandle::DynamicView(view) => dynamic_vertex_column(view.base(), sel, rows),
            #[cfg(feature = "dynamic")]
            FragmentHandle::DynamicProjected(frag) => {
                dynamic_projected_vertex_column(frag, sel, rows)
            }
            FragmentHandle::Columnar(_) => Err(EngineError::IllegalState(
                "context vertex columns need a labeled selector".into(),
            )),
        }
    }

    fn labeled_target(&self, label: &str) -> Result<(&ColumnarFragment, usize), EngineError> {
        let FragmentHandle::Columnar(frag) = &self.base else {
            return Err(EngineError::IllegalState(
                "labeled context lost its property graph".into(),
            ));
        };
        let label_id = frag
            .schema()
            .vertex_label_id(label)
            .ok_or_else(|| EngineError::NotFound(format!("vertex label {label}")))?;
        Ok((frag, label_id))
    }

    /// Label the base projection carved its vertices from, for binding
    /// unlabeled results back onto the parent property graph.
    fn projected_label(&self) -> Result<usize, EngineError> {
        match &self.base {
            FragmentHandle::Projected(frag) => Ok(frag.labels().0 as usize),
            _ => Err(EngineError::IllegalState(
                "context was not computed over a columnar graph".into(),
            )),
        }
    }
}

fn axis_addressed() -> EngineError {
    EngineError::InvalidOperation("tensor contexts are addressed by axis".into())
}

fn needs_named_column() -> EngineError {
    EngineError::InvalidValue("a property context needs a named result column".into())
}

fn labeled_base(base: &FragmentHandle) -> Result<&ColumnarFragment, EngineError> {
    match base {
        FragmentHandle::Columnar(frag) => Ok(frag),
        _ => Err(EngineError::InvalidValue(
            "labeled contexts need a property graph".into(),
        )),
    }
}

fn unlabeled_row_count(base: &FragmentHandle) -> Result<usize, EngineError> {
    match base {
        FragmentHandle::Projected(frag) => Ok(frag.local_vertex_count()),
        #[cfg(feature = "dynamic")]
        FragmentHandle::Dynamic(frag) => Ok(frag.owned_vertices().len()),
        #[cfg(feature = "dynamic")]
        FragmentHandle::DynamicView(view) => Ok(view.base().owned_vertices().len()),
        #[cfg(feature = "dynamic")]
        FragmentHandle::DynamicProjected(frag) => Ok(frag.vertex_ids().len()),
        FragmentHandle::Columnar(_) => Err(EngineError::InvalidValue(
            "property graph contexts need labeled columns".into(),
        )),
    }
}

fn check_rows(data: &Column, rows: usize) -> Result<(), EngineError> {
    if data.len() == rows {
        return Ok(());
    }
    Err(EngineError::InvalidValue(format!(
        "context column has {} rows, fragment holds {rows}",
        data.len()
    )))
}

fn check_label_rows(
    frag: &ColumnarFragment,
    label_id: usize,
    data: &Column,
) -> Result<(), EngineError> {
    if frag.schema().vertex_label(label_id).is_none() {
        return Err(EngineError::InvalidValue(format!(
            "vertex label id {label_id} out of range"
        )));
    }
    let rows = frag.vmap().vertex_count(frag.fid(), label_id);
    if data.len() == rows {
        return Ok(());
    }
    Err(EngineError::InvalidValue(format!(
        "context column has {} rows, label {label_id} holds {rows}",
        data.len()
    )))
}
