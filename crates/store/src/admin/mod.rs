//! Back-office change lists.
//!
//! Each admin is an explicit [`ModelAdmin`] value: columns, list filters,
//! search fields, ordering, page size and bulk actions. One generic
//! [`changelist`] turns any configuration plus the request's query
//! parameters into a JSON [`ChangeList`]; one generic [`run_action`] applies
//! a bulk action to selected rows; [`edit_rows`] saves in-place edits of the
//! admin's editable columns.
//!
//! # Query parameters
//!
//! - `q` - search term; every word must match one of the search fields
//! - `o` - column name to sort by, prefixed with `-` for descending
//! - `page` - 1-based page number
//! - one parameter per configured filter
//!
//! Anything else is rejected with [`AdminError::UnknownParameter`].

pub mod collections;
pub mod customers;
pub mod orders;
pub mod products;

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::db::{
    Annotated, Assignment, Col, Executor, Expr, Model, OrderBy, Q, Query, QuerySet, Record,
    RepositoryError,
};
use crate::serializers::{Payload, ValidationErrors};

pub use orders::{OrderDetail, order_detail};

/// Search parameter.
pub const SEARCH_PARAM: &str = "q";
/// Ordering parameter.
pub const ORDER_PARAM: &str = "o";
/// Page parameter.
pub const PAGE_PARAM: &str = "page";

/// Query parameters of a change list request.
pub type Params = BTreeMap<String, String>;

/// Errors raised while building a change list or running an action.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for {param}: {value}")]
    InvalidValue { param: String, value: String },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid rows: {0:?}")]
    Invalid(ValidationErrors),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

fn invalid(param: &str, value: &str) -> AdminError {
    AdminError::InvalidValue {
        param: param.to_owned(),
        value: value.to_owned(),
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// A change list column.
pub struct Column<M> {
    pub name: &'static str,
    pub label: &'static str,
    pub value: fn(&Annotated<M>) -> serde_json::Value,
    /// Sort key; `None` makes the column unsortable.
    pub ordering: Option<Expr<M>>,
    /// Target of the cell's link, if any.
    pub link: Option<fn(&Annotated<M>) -> String>,
}

impl<M> Column<M> {
    /// Create an unsortable column.
    #[must_use]
    pub const fn new(
        name: &'static str,
        label: &'static str,
        value: fn(&Annotated<M>) -> serde_json::Value,
    ) -> Self {
        Self {
            name,
            label,
            value,
            ordering: None,
            link: None,
        }
    }

    /// Sort by `key` when this column is chosen.
    #[must_use]
    pub fn ordering(mut self, key: Expr<M>) -> Self {
        self.ordering = Some(key);
        self
    }

    /// Link each cell.
    #[must_use]
    pub const fn link(mut self, href: fn(&Annotated<M>) -> String) -> Self {
        self.link = Some(href);
        self
    }
}

/// Where a filter's choices come from.
pub enum Choices {
    /// Rows of a related table; the value is the row id.
    Related {
        query: Query,
        label: fn(&Record) -> String,
    },
    /// Fixed `(value, label)` pairs.
    Fixed(Vec<(&'static str, &'static str)>),
}

/// A sidebar filter: a query parameter, its choices and how a chosen value
/// narrows the rows.
pub struct ListFilter<M> {
    pub parameter: &'static str,
    pub title: &'static str,
    pub choices: Choices,
    /// `None` rejects the value.
    pub lookup: fn(&str) -> Option<Q<M>>,
}

impl<M> ListFilter<M> {
    /// Filter over a related table.
    #[must_use]
    pub fn related(
        parameter: &'static str,
        title: &'static str,
        query: Query,
        label: fn(&Record) -> String,
        lookup: fn(&str) -> Option<Q<M>>,
    ) -> Self {
        Self {
            parameter,
            title,
            choices: Choices::Related { query, label },
            lookup,
        }
    }

    /// Filter with fixed choices.
    #[must_use]
    pub const fn simple(
        parameter: &'static str,
        title: &'static str,
        choices: Vec<(&'static str, &'static str)>,
        lookup: fn(&str) -> Option<Q<M>>,
    ) -> Self {
        Self {
            parameter,
            title,
            choices: Choices::Fixed(choices),
            lookup,
        }
    }

    /// Date filter with the usual relative ranges.
    #[must_use]
    pub fn date(
        parameter: &'static str,
        title: &'static str,
        lookup: fn(&str) -> Option<Q<M>>,
    ) -> Self {
        Self::simple(parameter, title, DATE_CHOICES.to_vec(), lookup)
    }
}

/// Search field and how it matches.
pub enum SearchField<M> {
    /// Case-insensitive substring.
    Contains(Col<M, String>),
    /// Case-insensitive prefix.
    StartsWith(Col<M, String>),
}

impl<M> SearchField<M> {
    fn matches(&self, word: &str) -> Q<M> {
        match self {
            Self::Contains(col) => col.icontains(word),
            Self::StartsWith(col) => col.istarts_with(word),
        }
    }
}

/// Bulk action: a set of assignments applied to the selected rows.
pub struct Action<M> {
    pub name: &'static str,
    pub description: &'static str,
    pub assignments: fn() -> Vec<Assignment<M>>,
    pub message: fn(u64) -> String,
}

/// A column that can be changed from the change list.
pub struct Editable<M> {
    pub name: &'static str,
    /// Read the submitted value; `None` once an error is recorded.
    pub parse: fn(&mut Payload<'_>) -> Option<Assignment<M>>,
}

/// Change list configuration for model `M`.
pub struct ModelAdmin<M> {
    /// Base rows: eager loads and annotations.
    pub queryset: QuerySet<M>,
    pub pk: fn(&M) -> i32,
    pub columns: Vec<Column<M>>,
    pub filters: Vec<ListFilter<M>>,
    pub search_fields: Vec<SearchField<M>>,
    pub ordering: Vec<OrderBy>,
    pub per_page: usize,
    pub actions: Vec<Action<M>>,
    pub editable: Vec<Editable<M>>,
}

impl<M: Model> ModelAdmin<M> {
    /// Admin over every row of `M` with no columns yet.
    #[must_use]
    pub fn new(pk: fn(&M) -> i32) -> Self {
        Self {
            queryset: M::objects(),
            pk,
            columns: Vec::new(),
            filters: Vec::new(),
            search_fields: Vec::new(),
            ordering: Vec::new(),
            per_page: 100,
            actions: Vec::new(),
            editable: Vec::new(),
        }
    }

    #[must_use]
    pub fn queryset(mut self, queryset: QuerySet<M>) -> Self {
        self.queryset = queryset;
        self
    }

    #[must_use]
    pub fn column(mut self, column: Column<M>) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: ListFilter<M>) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn search(mut self, field: SearchField<M>) -> Self {
        self.search_fields.push(field);
        self
    }

    #[must_use]
    pub fn ordering(mut self, keys: impl IntoIterator<Item = OrderBy>) -> Self {
        self.ordering = keys.into_iter().collect();
        self
    }

    #[must_use]
    pub const fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page;
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action<M>) -> Self {
        self.actions.push(action);
        self
    }

    /// Allow in-place edits of the column `name`.
    #[must_use]
    pub fn editable(
        mut self,
        name: &'static str,
        parse: fn(&mut Payload<'_>) -> Option<Assignment<M>>,
    ) -> Self {
        self.editable.push(Editable { name, parse });
        self
    }

    fn is_editable(&self, name: &str) -> bool {
        self.editable.iter().any(|editable| editable.name == name)
    }

    fn search_predicate(&self, term: &str) -> Option<Q<M>> {
        Q::all(term.split_whitespace().filter_map(|word| {
            Q::any(self.search_fields.iter().map(|field| field.matches(word)))
        }))
    }

    fn order_for(&self, value: &str) -> Result<OrderBy, AdminError> {
        let (name, descending) = value
            .strip_prefix('-')
            .map_or((value, false), |name| (name, true));
        let key = self
            .columns
            .iter()
            .find(|column| column.name == name)
            .and_then(|column| column.ordering.clone())
            .ok_or_else(|| invalid(ORDER_PARAM, value))?;
        Ok(if descending { key.desc() } else { key.asc() })
    }
}

// =============================================================================
// Change list
// =============================================================================

/// Column header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub name: String,
    pub label: String,
    pub sortable: bool,
    pub editable: bool,
}

/// One choice of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChoice {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

/// A filter with its choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChoices {
    pub parameter: String,
    pub title: String,
    pub choices: Vec<FilterChoice>,
}

/// Action offered by the change list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub name: String,
    pub description: String,
}

/// A rendered row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: i32,
    pub cells: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

/// A rendered change list page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeList {
    pub model: String,
    pub columns: Vec<ColumnHeader>,
    pub filters: Vec<FilterChoices>,
    pub search_enabled: bool,
    pub actions: Vec<ActionInfo>,
    pub rows: Vec<Row>,
    /// Rows matching the filters and search.
    pub count: i64,
    /// Rows before filtering.
    pub total: i64,
    pub page: usize,
    pub num_pages: usize,
    pub per_page: usize,
}

/// Render one page of `admin` for the given query parameters.
///
/// # Errors
///
/// Returns `AdminError::UnknownParameter` or `AdminError::InvalidValue` for
/// bad parameters, `AdminError::Repository` if a query fails.
#[instrument(skip(db, admin), fields(model = M::meta().name))]
pub async fn changelist<M: Model, E: Executor + ?Sized>(
    db: &E,
    admin: &ModelAdmin<M>,
    params: &Params,
) -> Result<ChangeList, AdminError> {
    for key in params.keys() {
        let known = key == ORDER_PARAM
            || key == PAGE_PARAM
            || (key == SEARCH_PARAM && !admin.search_fields.is_empty())
            || admin.filters.iter().any(|filter| filter.parameter == key);
        if !known {
            return Err(AdminError::UnknownParameter(key.clone()));
        }
    }

    let total = admin.queryset.count(db).await?;

    let mut rows = admin.queryset.clone();
    for filter in &admin.filters {
        if let Some(value) = params.get(filter.parameter) {
            let predicate =
                (filter.lookup)(value).ok_or_else(|| invalid(filter.parameter, value))?;
            rows = rows.filter(predicate);
        }
    }
    if let Some(term) = params.get(SEARCH_PARAM)
        && let Some(predicate) = admin.search_predicate(term)
    {
        rows = rows.filter(predicate);
    }

    let mut ordering = match params.get(ORDER_PARAM) {
        Some(value) => vec![admin.order_for(value)?],
        None => admin.ordering.clone(),
    };
    // Stable pages need a total order.
    ordering.push(Col::<M, i32>::new("id").asc());
    rows = rows.order_by(ordering);

    let count = rows.count(db).await?;
    let per_page = admin.per_page.max(1);
    let num_pages = usize::try_from(count)
        .unwrap_or(0)
        .div_ceil(per_page)
        .max(1);
    let page = match params.get(PAGE_PARAM) {
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|page| (1..=num_pages).contains(page))
            .ok_or_else(|| invalid(PAGE_PARAM, value))?,
        None => 1,
    };
    let start = (page - 1) * per_page;
    let objects = rows.slice(start..start + per_page).annotated(db).await?;

    let mut filters = Vec::with_capacity(admin.filters.len());
    for filter in &admin.filters {
        filters.push(filter_choices(db, filter, params.get(filter.parameter)).await?);
    }

    Ok(ChangeList {
        model: M::meta().name.to_owned(),
        columns: admin
            .columns
            .iter()
            .map(|column| ColumnHeader {
                name: column.name.to_owned(),
                label: column.label.to_owned(),
                sortable: column.ordering.is_some(),
                editable: admin.is_editable(column.name),
            })
            .collect(),
        filters,
        search_enabled: !admin.search_fields.is_empty(),
        actions: admin
            .actions
            .iter()
            .map(|action| ActionInfo {
                name: action.name.to_owned(),
                description: action.description.to_owned(),
            })
            .collect(),
        rows: objects.iter().map(|object| render_row(admin, object)).collect(),
        count,
        total,
        page,
        num_pages,
        per_page,
    })
}

fn render_row<M>(admin: &ModelAdmin<M>, object: &Annotated<M>) -> Row {
    let mut cells = serde_json::Map::new();
    let mut links = BTreeMap::new();
    for column in &admin.columns {
        cells.insert(column.name.to_owned(), (column.value)(object));
        if let Some(href) = column.link {
            links.insert(column.name.to_owned(), href(object));
        }
    }
    Row {
        id: (admin.pk)(&object.object),
        cells,
        links,
    }
}

async fn filter_choices<M, E: Executor + ?Sized>(
    db: &E,
    filter: &ListFilter<M>,
    selected: Option<&String>,
) -> Result<FilterChoices, AdminError> {
    let pairs: Vec<(String, String)> = match &filter.choices {
        Choices::Related { query, label } => db
            .fetch(query)
            .await?
            .iter()
            .map(|record| Ok((record.id()?.to_string(), label(record))))
            .collect::<Result<_, RepositoryError>>()?,
        Choices::Fixed(pairs) => pairs
            .iter()
            .map(|(value, label)| ((*value).to_owned(), (*label).to_owned()))
            .collect(),
    };
    Ok(FilterChoices {
        parameter: filter.parameter.to_owned(),
        title: filter.title.to_owned(),
        choices: pairs
            .into_iter()
            .map(|(value, label)| FilterChoice {
                selected: selected.is_some_and(|s| *s == value),
                value,
                label,
            })
            .collect(),
    })
}

// =============================================================================
// Actions
// =============================================================================

/// Selected rows for a bulk action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ActionRequest {
    pub ids: Vec<i32>,
}

/// Result of a bulk action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub count: u64,
    pub message: String,
}

/// Apply the action named `name` to the rows with the given ids.
///
/// # Errors
///
/// Returns `AdminError::UnknownAction` if `admin` has no such action.
#[instrument(skip(db, admin, ids), fields(model = M::meta().name, selected = ids.len()))]
pub async fn run_action<M: Model, E: Executor + ?Sized>(
    db: &E,
    admin: &ModelAdmin<M>,
    name: &str,
    ids: &[i32],
) -> Result<ActionOutcome, AdminError> {
    let action = admin
        .actions
        .iter()
        .find(|action| action.name == name)
        .ok_or_else(|| AdminError::UnknownAction(name.to_owned()))?;

    let count = M::objects()
        .filter(Col::<M, i32>::new("id").is_in(ids.iter().copied()))
        .update(db, (action.assignments)())
        .await?;
    tracing::info!(action = name, count, "admin action applied");

    Ok(ActionOutcome {
        count,
        message: (action.message)(count),
    })
}

// =============================================================================
// In-place edits
// =============================================================================

/// In-place edits submitted from a change list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EditRequest {
    pub rows: Vec<RowEdit>,
}

/// New values for one row, keyed by column name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RowEdit {
    pub id: i32,
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Save in-place edits. Every row is validated first; errors are keyed
/// `rows[i].column` and nothing is written unless all rows are valid.
///
/// # Errors
///
/// Returns `AdminError::Invalid` for non-editable columns, invalid values or
/// unknown ids, `AdminError::Repository` if a query fails.
#[instrument(skip(db, admin, rows), fields(model = M::meta().name, edited = rows.len()))]
pub async fn edit_rows<M: Model, E: Executor + ?Sized>(
    db: &E,
    admin: &ModelAdmin<M>,
    rows: &[RowEdit],
) -> Result<ActionOutcome, AdminError> {
    let id = Col::<M, i32>::new("id");
    let mut errors = ValidationErrors::new();
    let mut updates = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let body = serde_json::Value::Object(row.values.clone());
        let mut payload = Payload::new(&body).map_err(AdminError::Invalid)?;
        let mut assignments = Vec::new();
        for name in row.values.keys() {
            match admin.editable.iter().find(|editable| editable.name == name) {
                Some(editable) => assignments.extend((editable.parse)(&mut payload)),
                None => payload.reject(name, "This field is not editable."),
            }
        }
        if !M::objects().filter(id.eq(row.id)).exists(db).await? {
            payload.reject(
                "id",
                format!("Invalid pk \"{}\" - object does not exist.", row.id),
            );
        }

        let row_errors = payload.into_errors();
        if row_errors.is_empty() {
            updates.push((row.id, assignments));
        } else {
            errors.extend_nested(&format!("rows[{index}]"), row_errors);
        }
    }
    if !errors.is_empty() {
        return Err(AdminError::Invalid(errors));
    }

    let mut count = 0;
    for (pk, assignments) in updates {
        if !assignments.is_empty() {
            count += M::objects().filter(id.eq(pk)).update(db, assignments).await?;
        }
    }
    tracing::info!(count, "admin rows edited");

    let name = M::meta().name;
    let message = if count == 1 {
        format!("1 {name} was changed successfully.")
    } else {
        format!("{count} {name}s were changed successfully.")
    };
    Ok(ActionOutcome { count, message })
}

// =============================================================================
// Date ranges
// =============================================================================

/// Choices offered by date filters.
pub const DATE_CHOICES: [(&str, &str); 4] = [
    ("today", "Today"),
    ("past_7_days", "Past 7 days"),
    ("this_month", "This month"),
    ("this_year", "This year"),
];

/// Half-open `[start, end)` range for a date filter choice, relative to `now`.
#[must_use]
pub fn date_range(choice: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let today = now.date_naive();
    let tomorrow = today.succ_opt()?;
    let (start, end) = match choice {
        "today" => (today, tomorrow),
        "past_7_days" => (today - Duration::days(7), tomorrow),
        "this_month" => {
            let first = today.with_day(1)?;
            let next = if first.month() == 12 {
                NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)?
            };
            (first, next)
        }
        "this_year" => (
            NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
            NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
        ),
        _ => return None,
    };
    Some((midnight(start), midnight(end)))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Predicate for a date filter choice on `column`.
#[must_use]
pub fn date_lookup<M>(column: &Col<M, DateTime<Utc>>, choice: &str) -> Option<Q<M>> {
    let (start, end) = date_range(choice, Utc::now())?;
    Some(column.gte(start) & column.lt(end))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_date_ranges() {
        let now = Utc.with_ymd_and_hms(2024, 12, 18, 15, 30, 0).unwrap();

        let (start, end) = date_range("today", now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 18, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 12, 19, 0, 0, 0).unwrap());

        let (start, _) = date_range("past_7_days", now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 11, 0, 0, 0).unwrap());

        let (start, end) = date_range("this_month", now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

        let (start, end) = date_range("this_year", now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

        assert!(date_range("yesterday", now).is_none());
    }
}
