use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::fs;

use crate::core::{
    domain::{ProblemId, Submission, SubmissionId, TestCase, UserId},
    pipeline::comparing::Comparison,
    traits::store::{ProblemStore, StoreError, SubmissionStore},
};

#[derive(Clone, Debug, Default)]
pub struct StoredProblem {
    pub samples: Vec<TestCase>,
    pub hidden: Vec<TestCase>,
    pub comparison: Comparison,
}

#[derive(Debug, Default)]
pub struct InMemoryProblemStore {
    problems: DashMap<ProblemId, StoredProblem>,
}

impl InMemoryProblemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<ProblemId>, problem: StoredProblem) {
        self.problems.insert(id.into(), problem);
    }

    /// Loads a problem laid out as:
    ///
    /// ```text
    /// <dir>/sample/<name>.in, <name>.out
    /// <dir>/hidden/<name>.in, <name>.out
    /// <dir>/tolerance            (optional, a float)
    /// ```
    ///
    /// Cases are ordered by name, numerically when the names are numbers.
    /// A missing `sample` or `hidden` directory means no cases of that kind.
    #[tracing::instrument(skip(self, dir), fields(dir = %dir.as_ref().display()))]
    pub async fn load_dir(
        &self,
        id: impl Into<ProblemId> + std::fmt::Debug,
        dir: impl AsRef<Path>,
    ) -> Result<(), StoreError> {
        let dir = dir.as_ref();
        let samples = read_cases(&dir.join("sample")).await?;
        let hidden = read_cases(&dir.join("hidden")).await?;
        let comparison = read_comparison(&dir.join("tolerance")).await?;
        tracing::info!(
            samples = samples.len(),
            hidden = hidden.len(),
            ?comparison,
            "Problem loaded"
        );

        self.insert(
            id,
            StoredProblem {
                samples,
                hidden,
                comparison,
            },
        );
        Ok(())
    }

    fn read<T>(
        &self,
        id: &ProblemId,
        f: impl FnOnce(&StoredProblem) -> T,
    ) -> Result<T, StoreError> {
        self.problems
            .get(id)
            .map(|problem| f(&problem))
            .ok_or_else(|| StoreError::problem_not_found(id))
    }
}

#[async_trait::async_trait]
impl ProblemStore for InMemoryProblemStore {
    async fn hidden_test_cases(&self, problem: &ProblemId) -> Result<Vec<TestCase>, StoreError> {
        self.read(problem, |p| p.hidden.clone())
    }

    async fn sample_test_cases(&self, problem: &ProblemId) -> Result<Vec<TestCase>, StoreError> {
        self.read(problem, |p| p.samples.clone())
    }

    async fn comparison(&self, problem: &ProblemId) -> Result<Comparison, StoreError> {
        self.read(problem, |p| p.comparison)
    }
}

fn io_error(path: &Path, error: io::Error) -> StoreError {
    StoreError::Unavailable {
        msg: format!("{}: {}", path.display(), error),
    }
}

async fn read_cases(dir: &Path) -> Result<Vec<TestCase>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(io_error(dir, error)),
    };

    let mut inputs: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|error| io_error(dir, error))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "in") {
            inputs.push(path);
        }
    }
    inputs.sort_by_key(|path| case_order(path));

    let mut cases = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = input.with_extension("out");
        let stdin = fs::read_to_string(&input)
            .await
            .map_err(|error| io_error(&input, error))?;
        let expected = fs::read_to_string(&output)
            .await
            .map_err(|error| io_error(&output, error))?;
        cases.push(TestCase::new(stdin, expected));
    }
    Ok(cases)
}

fn case_order(path: &Path) -> (Option<u64>, String) {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    (stem.parse().ok(), stem.to_string())
}

async fn read_comparison(path: &Path) -> Result<Comparison, StoreError> {
    match fs::read_to_string(path).await {
        Ok(text) => text
            .trim()
            .parse::<f64>()
            .map(Comparison::Tolerance)
            .map_err(|error| StoreError::Unavailable {
                msg: format!("{}: invalid tolerance: {}", path.display(), error),
            }),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Comparison::Exact),
        Err(error) => Err(io_error(path, error)),
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubmissionStore {
    submissions: DashMap<SubmissionId, Submission>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn create(&self, submission: &Submission) -> Result<(), StoreError> {
        match self.submissions.entry(submission.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                entity: "submission",
                id: submission.id.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(submission.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, submission: &Submission) -> Result<(), StoreError> {
        match self.submissions.get_mut(&submission.id) {
            Some(mut stored) => {
                *stored = submission.clone();
                Ok(())
            }
            None => Err(StoreError::submission_not_found(&submission.id)),
        }
    }

    async fn get(&self, id: &SubmissionId) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.get(id).map(|s| s.value().clone()))
    }

    async fn list_for_user_problem(
        &self,
        user: &UserId,
        problem: &ProblemId,
    ) -> Result<Vec<Submission>, StoreError> {
        let mut submissions: Vec<Submission> = self
            .submissions
            .iter()
            .filter(|s| &s.user_id == user && &s.problem_id == problem)
            .map(|s| s.value().clone())
            .collect();
        submissions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(submissions)
    }
}
