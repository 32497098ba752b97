use std::cmp::Ordering;
use std::str::FromStr;

use crate::error::StoreError;
use crate::models::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl StatusFilter {
    fn keeps(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(StoreError::validation(format!("unknown filter `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Default,
    DueDate,
    Priority,
}

impl FromStr for SortBy {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "default" => Ok(Self::Default),
            "dueDate" => Ok(Self::DueDate),
            "priority" => Ok(Self::Priority),
            other => Err(StoreError::validation(format!("unknown sort `{other}`"))),
        }
    }
}

/// Search, filter and ordering applied to one user's task list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    search: Option<String>,
    pub filter: StatusFilter,
    pub sort_by: SortBy,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a query from raw request parameters.
    pub fn parse(
        search: Option<&str>,
        filter: Option<&str>,
        sort_by: Option<&str>,
    ) -> Result<Self, StoreError> {
        let mut query = Self::new();
        if let Some(search) = search {
            query = query.with_search(search);
        }
        if let Some(filter) = filter {
            query.filter = filter.parse()?;
        }
        if let Some(sort_by) = sort_by {
            query.sort_by = sort_by.parse()?;
        }
        Ok(query)
    }

    /// Blank terms are dropped; matching is case-insensitive.
    pub fn with_search(mut self, term: &str) -> Self {
        let term = term.trim();
        self.search = (!term.is_empty()).then(|| term.to_lowercase());
        self
    }

    pub fn with_filter(mut self, filter: StatusFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sorted_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn matches(&self, task: &Task) -> bool {
        if !self.filter.keeps(task) {
            return false;
        }
        match &self.search {
            Some(term) => task.text.to_lowercase().contains(term.as_str()),
            None => true,
        }
    }

    /// Narrows and orders `tasks`. Sorting is stable, so ties keep the order
    /// the backing store returned them in.
    pub fn apply(&self, mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.retain(|task| self.matches(task));
        match self.sort_by {
            SortBy::Default => {}
            SortBy::DueDate => tasks.sort_by(by_due_date),
            SortBy::Priority => tasks.sort_by_key(|task| task.priority.rank()),
        }
        tasks
    }
}

// Undated tasks go last.
fn by_due_date(a: &Task, b: &Task) -> Ordering {
    match (a.due_date, b.due_date) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rstest::rstest;

    use super::*;
    use crate::models::{Priority, TaskId};

    fn task(id: &str, text: &str, completed: bool, priority: Priority, due: Option<&str>) -> Task {
        Task {
            id: TaskId(id.to_string()),
            user_id: None,
            text: text.to_string(),
            completed,
            priority,
            due_date: due.map(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()),
            subtasks: Vec::new(),
        }
    }

    fn sample() -> Vec<Task> {
        vec![
            task("1", "Buy milk", false, Priority::Low, Some("2025-03-10")),
            task("2", "Call the bank", true, Priority::High, None),
            task("3", "MILKSHAKE recipe", true, Priority::Medium, Some("2025-01-05")),
            task("4", "Book flights", false, Priority::High, Some("2025-02-01")),
            task("5", "Read", false, Priority::Medium, None),
        ]
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[test]
    fn empty_query_keeps_natural_order() {
        let tasks = TaskQuery::new().apply(sample());
        assert_eq!(ids(&tasks), ["1", "2", "3", "4", "5"]);
    }

    #[rstest]
    #[case("milk", &["1", "3"])]
    #[case("MiLk", &["1", "3"])]
    #[case("   ", &["1", "2", "3", "4", "5"])]
    #[case("nothing matches", &[])]
    fn search_is_case_insensitive_substring(#[case] term: &str, #[case] expected: &[&str]) {
        let tasks = TaskQuery::new().with_search(term).apply(sample());
        assert_eq!(ids(&tasks), expected);
    }

    #[test]
    fn active_and_completed_partition_the_list() {
        let active = TaskQuery::new()
            .with_filter(StatusFilter::Active)
            .apply(sample());
        let completed = TaskQuery::new()
            .with_filter(StatusFilter::Completed)
            .apply(sample());

        assert!(active.iter().all(|task| !task.completed));
        assert!(completed.iter().all(|task| task.completed));
        assert_eq!(active.len() + completed.len(), sample().len());
        let mut all: Vec<_> = ids(&active).into_iter().chain(ids(&completed)).collect();
        all.sort_unstable();
        assert_eq!(all, ["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn priority_sort_is_stable_high_to_low() {
        let tasks = TaskQuery::new()
            .sorted_by(SortBy::Priority)
            .apply(sample());
        assert_eq!(ids(&tasks), ["2", "4", "3", "5", "1"]);
    }

    #[test]
    fn due_date_sort_puts_undated_last() {
        let tasks = TaskQuery::new().sorted_by(SortBy::DueDate).apply(sample());
        assert_eq!(ids(&tasks), ["3", "4", "1", "2", "5"]);
    }

    #[test]
    fn search_filter_and_sort_compose() {
        let query = TaskQuery::parse(Some("b"), Some("active"), Some("priority")).unwrap();
        let tasks = query.apply(sample());
        assert_eq!(ids(&tasks), ["4", "1"]);
    }

    #[rstest]
    #[case(None, None, StatusFilter::All, SortBy::Default)]
    #[case(Some("all"), Some("default"), StatusFilter::All, SortBy::Default)]
    #[case(Some("active"), Some("dueDate"), StatusFilter::Active, SortBy::DueDate)]
    #[case(Some("completed"), Some("priority"), StatusFilter::Completed, SortBy::Priority)]
    fn parses_known_parameters(
        #[case] filter: Option<&str>,
        #[case] sort_by: Option<&str>,
        #[case] expected_filter: StatusFilter,
        #[case] expected_sort: SortBy,
    ) {
        let query = TaskQuery::parse(None, filter, sort_by).unwrap();
        assert_eq!(query.filter, expected_filter);
        assert_eq!(query.sort_by, expected_sort);
        assert_eq!(query.search(), None);
    }

    #[rstest]
    #[case(Some("done"), None)]
    #[case(None, Some("alphabetical"))]
    fn rejects_unknown_parameters(#[case] filter: Option<&str>, #[case] sort_by: Option<&str>) {
        let err = TaskQuery::parse(None, filter, sort_by).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
