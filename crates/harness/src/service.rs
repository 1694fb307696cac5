use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use wfst_core::{Feature, FeatureId, Filter};
use wfst_remote::{AssignedIds, FeatureCursor, RemoteError, RemoteService, TransactionBatch};

/// A failure to inject into the next matching call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transport(String),
    Reject(String),
    /// Let the call succeed on the service but drop this many ids from the
    /// response.
    DropIds(usize),
}

impl Fault {
    fn to_error(&self) -> RemoteError {
        match self {
            Fault::Transport(message) => RemoteError::Transport(message.clone()),
            Fault::Reject(payload) => RemoteError::rejected(payload.clone()),
            Fault::DropIds(n) => RemoteError::Protocol(format!("{n} id(s) missing")),
        }
    }
}

/// One query as the service received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub type_name: String,
    pub filter: Filter,
    pub properties: Option<Vec<String>>,
}

struct OpenCursor(Arc<AtomicUsize>);

impl Drop for OpenCursor {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wraps a real service, recording every request and tracking how many
/// cursors are still open. Faults can be queued for the next commit or
/// query.
pub struct RecordingService {
    inner: Arc<dyn RemoteService>,
    queries: Mutex<Vec<RecordedQuery>>,
    commits: Mutex<Vec<Vec<TransactionBatch>>>,
    commit_faults: Mutex<VecDeque<Fault>>,
    query_faults: Mutex<VecDeque<Fault>>,
    open: Arc<AtomicUsize>,
}

impl RecordingService {
    pub fn new(inner: Arc<dyn RemoteService>) -> Self {
        Self {
            inner,
            queries: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            commit_faults: Mutex::new(VecDeque::new()),
            query_faults: Mutex::new(VecDeque::new()),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_next_commit(&self, fault: Fault) {
        self.commit_faults.lock().push_back(fault);
    }

    pub fn fail_next_query(&self, fault: Fault) {
        self.query_faults.lock().push_back(fault);
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    /// Every commit request, including ones that failed.
    pub fn commits(&self) -> Vec<Vec<TransactionBatch>> {
        self.commits.lock().clone()
    }

    pub fn open_cursors(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn clear_log(&self) {
        self.queries.lock().clear();
        self.commits.lock().clear();
    }
}

impl RemoteService for RecordingService {
    fn query(
        &self,
        type_name: &str,
        filter: &Filter,
        properties: Option<&[String]>,
    ) -> Result<FeatureCursor, RemoteError> {
        self.queries.lock().push(RecordedQuery {
            type_name: type_name.to_string(),
            filter: filter.clone(),
            properties: properties.map(<[String]>::to_vec),
        });
        if let Some(fault) = self.query_faults.lock().pop_front() {
            return Err(fault.to_error());
        }

        let cursor = self.inner.query(type_name, filter, properties)?;
        self.open.fetch_add(1, Ordering::SeqCst);
        let guard = OpenCursor(Arc::clone(&self.open));
        Ok(Box::new(cursor.inspect(move |_| {
            let _open = &guard;
        })))
    }

    fn commit_transaction(
        &self,
        batches: &[TransactionBatch],
    ) -> Result<Vec<AssignedIds>, RemoteError> {
        self.commits.lock().push(batches.to_vec());
        let fault = self.commit_faults.lock().pop_front();
        match fault {
            None => self.inner.commit_transaction(batches),
            Some(Fault::DropIds(n)) => {
                let mut assigned = self.inner.commit_transaction(batches)?;
                if let Some(first) = assigned.iter_mut().find(|a| !a.ids.is_empty()) {
                    let keep = first.ids.len().saturating_sub(n);
                    first.ids.truncate(keep);
                }
                Ok(assigned)
            }
            Some(fault) => Err(fault.to_error()),
        }
    }
}

/// Fixed in-memory dataset whose commit responses are scripted up front.
/// Commits never change the dataset.
#[derive(Default)]
pub struct ScriptedService {
    features: Vec<(String, Feature)>,
    responses: Mutex<VecDeque<Result<Vec<AssignedIds>, Fault>>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature(mut self, type_name: &str, feature: Feature) -> Self {
        self.features.push((type_name.to_string(), feature));
        self
    }

    /// Queue a successful response assigning `ids` to `type_name`.
    pub fn respond_with(&self, type_name: &str, ids: &[&str]) {
        self.responses.lock().push_back(Ok(vec![AssignedIds {
            type_name: type_name.to_string(),
            ids: ids.iter().map(|id| FeatureId::new(*id)).collect(),
        }]));
    }

    pub fn respond_with_fault(&self, fault: Fault) {
        self.responses.lock().push_back(Err(fault));
    }
}

impl RemoteService for ScriptedService {
    fn query(
        &self,
        type_name: &str,
        filter: &Filter,
        properties: Option<&[String]>,
    ) -> Result<FeatureCursor, RemoteError> {
        let properties = properties.map(<[String]>::to_vec);
        let matched: Vec<Feature> = self
            .features
            .iter()
            .filter(|(t, f)| t == type_name && filter.evaluate(f))
            .map(|(_, f)| {
                let mut f = f.clone();
                if let Some(p) = &properties {
                    f.retain_properties(p);
                }
                f
            })
            .collect();
        Ok(Box::new(matched.into_iter().map(Ok)))
    }

    fn commit_transaction(
        &self,
        _batches: &[TransactionBatch],
    ) -> Result<Vec<AssignedIds>, RemoteError> {
        match self.responses.lock().pop_front() {
            Some(Ok(assigned)) => Ok(assigned),
            Some(Err(fault)) => Err(fault.to_error()),
            None => Err(RemoteError::Protocol("no scripted response".into())),
        }
    }
}
