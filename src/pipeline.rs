//! End-to-end request pipeline
//!
//! texts -> embeddings -> normalize/reduce -> HDBSCAN -> groups -> labels
//! -> gaps -> payload -> idea generation -> result.
//!
//! Collaborators (embedder, generative model) are injected so the whole flow
//! runs against fakes in tests. Only validation and embedding failures fail a
//! request; model failures degrade to a result without ideas.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ai_client::GenerativeModel;
use crate::cleaner::{clean_examples, DEFAULT_MAX_LEN};
use crate::embeddings::{encode_checked, Embedder};
use crate::error::{EmbeddingError, Result};
use crate::gaps;
use crate::grouping;
use crate::hdbscan::Hdbscan;
use crate::keywords::{extract_keywords, DEFAULT_TOP_K};
use crate::orchestrator::IdeaOrchestrator;
use crate::payload::{build_payload, MAX_PAYLOAD_CLUSTERS};
use crate::preprocess;
use crate::settings::Settings;
use crate::similarity::rank_by_centrality;
use crate::summary::generate_summary;
use crate::types::{
    ClusterGroup, ClusterId, ClusterLabel, ClusterRequest, IdeaOutcome, PipelineResult, DEFAULT_MAX_TEXTS,
};

/// Tunables that are not part of a request.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub allow_single_cluster: bool,
    pub keyword_count: usize,
    pub example_max_len: usize,
    pub max_payload_clusters: usize,
    pub max_texts: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            allow_single_cluster: true,
            keyword_count: DEFAULT_TOP_K,
            example_max_len: DEFAULT_MAX_LEN,
            max_payload_clusters: MAX_PAYLOAD_CLUSTERS,
            max_texts: DEFAULT_MAX_TEXTS,
        }
    }
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            allow_single_cluster: settings.allow_single_cluster,
            keyword_count: settings.keyword_count.max(1),
            example_max_len: settings.example_max_len.max(1),
            max_payload_clusters: settings.max_payload_clusters,
            max_texts: settings.max_texts,
        }
    }
}

/// Shared, read-only pipeline; one instance serves every request.
pub struct Pipeline {
    embedder: Arc<dyn Embedder>,
    orchestrator: IdeaOrchestrator,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn GenerativeModel>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            embedder,
            orchestrator: IdeaOrchestrator::new(model),
            options,
        }
    }

    /// Validate, embed, and run the full pipeline.
    pub fn run(&self, request: &ClusterRequest) -> Result<PipelineResult> {
        request.validate(self.options.max_texts)?;
        info!(
            items = request.texts.len(),
            query_chars = request.query.len(),
            "cluster request accepted"
        );

        let vectors = encode_checked(self.embedder.as_ref(), &request.texts)?;
        self.process(request, &vectors)
    }

    /// Run the pipeline on precomputed embeddings, one per text.
    pub fn run_with_vectors(&self, request: &ClusterRequest, vectors: &[Vec<f32>]) -> Result<PipelineResult> {
        request.validate(self.options.max_texts)?;
        if vectors.len() != request.texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: request.texts.len(),
                found: vectors.len(),
            }
            .into());
        }
        self.process(request, vectors)
    }

    fn process(&self, request: &ClusterRequest, vectors: &[Vec<f32>]) -> Result<PipelineResult> {
        let n = request.texts.len();

        let prepared = preprocess::prepare(vectors)?;
        let assignment = Hdbscan::new()
            .with_min_cluster_size(request.min_cluster_size)
            .with_min_samples(request.min_samples)
            .with_allow_single_cluster(self.options.allow_single_cluster)
            .fit(&prepared.projected)?;

        let (groups, outliers) = grouping::group(&assignment);
        info!(
            clusters = groups.len(),
            noise = outliers.len(),
            reduced = prepared.reduced,
            "clustering finished"
        );

        let labels: BTreeMap<ClusterId, ClusterLabel> = groups
            .iter()
            .map(|g| (g.id, self.label_cluster(g, &request.texts, &prepared.normalized)))
            .collect();

        let gaps = gaps::analyze(&groups, outliers.len(), n);
        debug!(findings = gaps.len(), "gap analysis done");

        let outlier_texts: Vec<&str> = outliers.iter().map(|&i| request.texts[i].as_str()).collect();
        let payload = build_payload(
            &request.query,
            &groups,
            &labels,
            &outlier_texts,
            self.options.max_payload_clusters,
        );
        debug!(clusters = payload.clusters.len(), "payload built");

        let ideas = match self.orchestrator.run(&payload) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "idea generation unavailable, returning clusters only");
                IdeaOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        Ok(PipelineResult {
            assignment,
            groups,
            labels,
            gaps,
            ideas,
        })
    }

    fn label_cluster(&self, group: &ClusterGroup, texts: &[String], normalized: &[Vec<f32>]) -> ClusterLabel {
        let member_texts: Vec<String> = group.members.iter().map(|&i| texts[i].clone()).collect();
        let keywords = extract_keywords(&member_texts, self.options.keyword_count);
        let (title, description) = generate_summary(&keywords);

        let ranked: Vec<&str> = rank_by_centrality(&group.members, normalized)
            .into_iter()
            .map(|i| texts[i].as_str())
            .collect();
        let examples = clean_examples(&ranked, self.options.example_max_len);

        ClusterLabel {
            title,
            description,
            keywords,
            examples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::{Completion, DisabledModel, GenerationConfig};
    use crate::error::{ModelError, PipelineError};
    use crate::types::{ClusterResponse, GapFinding};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Looks each text up in a fixed table; unknown texts fail the batch.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Arc<Self> {
            Arc::new(Self {
                table: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Embedder for TableEmbedder {
        fn encode(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts
                .iter()
                .map(|t| {
                    self.table
                        .get(t)
                        .cloned()
                        .ok_or_else(|| EmbeddingError::Inference(format!("unknown text {:?}", t)))
                })
                .collect()
        }
    }

    /// Always answers with the same completion.
    struct FixedModel(String);

    impl GenerativeModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> std::result::Result<Completion, ModelError> {
            Ok(Completion {
                text: self.0.clone(),
                truncated: false,
            })
        }
    }

    /// Simulates an upstream timeout.
    struct TimeoutModel;

    impl GenerativeModel for TimeoutModel {
        fn name(&self) -> &str {
            "timeout"
        }

        fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> std::result::Result<Completion, ModelError> {
            Err(ModelError::Api {
                status: 504,
                body: "deadline exceeded".into(),
            })
        }
    }

    fn cat_dog_table() -> Vec<(&'static str, Vec<f32>)> {
        vec![
            ("cat videos are fun", vec![1.0, 0.05, 0.0, 0.0]),
            ("funny cat clips", vec![1.0, 0.0, 0.05, 0.0]),
            ("dog training tips", vec![0.0, 1.0, 0.0, 0.0]),
            ("xyz", vec![0.0, 0.0, 0.0, 1.0]),
        ]
    }

    fn request(texts: &[&str], query: &str) -> ClusterRequest {
        ClusterRequest::new(texts.iter().map(|s| s.to_string()).collect(), query)
    }

    fn cat_request() -> ClusterRequest {
        request(
            &["cat videos are fun", "funny cat clips", "dog training tips", "xyz"],
            "cats",
        )
    }

    const IDEAS: &str = r#"{"cluster_analysis":[{"cluster_id":0,"theme":"cat comedy","gaps":["no how-to"],"ideas":[{"title":"Teach your cat one trick a day","description":"Daily cat trick challenge","format":"series","noveltyScore":8}]}]}"#;

    #[test]
    fn test_cat_scenario_end_to_end() {
        let pipeline = Pipeline::new(
            TableEmbedder::new(&cat_dog_table()),
            Arc::new(FixedModel(IDEAS.into())),
            PipelineOptions::default(),
        );
        let result = pipeline.run(&cat_request()).unwrap();

        assert_eq!(result.assignment.get(0), Some(ClusterId(0)));
        assert_eq!(result.assignment.get(1), Some(ClusterId(0)));
        assert_eq!(result.assignment.outliers(), vec![2, 3]);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].members, vec![0, 1]);

        assert!(result.gaps.contains(&GapFinding::TooManyOutliers { outliers: 2, total: 4 }));
        assert!(result.gaps.contains(&GapFinding::WeakCluster { id: ClusterId(0), size: 2 }));

        let label = &result.labels[&ClusterId(0)];
        assert_eq!(label.keywords[0], "cat");
        assert!(label.title.starts_with("Cat / "));
        assert_eq!(label.examples.len(), 2);

        match &result.ideas {
            IdeaOutcome::Parsed { analyses, .. } => {
                assert_eq!(analyses.len(), 1);
                assert_eq!(analyses[0].cluster_id, ClusterId(0));
            }
            other => panic!("unexpected idea outcome {:?}", other),
        }

        let response = ClusterResponse::from(result);
        assert_eq!(response.labels, vec![0, 0, -1, -1]);
        assert_eq!(response.outliers, vec![2, 3]);
        assert_eq!(response.raw_model_text, IDEAS);
        assert!(response.idea_error.is_none());
    }

    #[test]
    fn test_model_timeout_degrades_gracefully() {
        let pipeline = Pipeline::new(
            TableEmbedder::new(&cat_dog_table()),
            Arc::new(TimeoutModel),
            PipelineOptions::default(),
        );
        let response = ClusterResponse::from(pipeline.run(&cat_request()).unwrap());

        assert_eq!(response.labels.len(), 4);
        assert_eq!(response.clusters.get(&ClusterId(0)), Some(&2));
        assert!(response.unified_labels.contains_key(&ClusterId(0)));
        assert!(!response.gaps.is_empty());
        assert!(response.idea_analysis.is_none());
        assert!(response.idea_error.unwrap().contains("504"));
    }

    #[test]
    fn test_spam_example_is_excluded() {
        let spam = "Join our telegram group for more! http://x";
        let mut table = cat_dog_table();
        table.push((spam, vec![1.0, 0.03, 0.03, 0.0]));
        let pipeline = Pipeline::new(
            TableEmbedder::new(&table),
            Arc::new(DisabledModel),
            PipelineOptions::default(),
        );

        let mut req = request(&["cat videos are fun", spam, "funny cat clips", "xyz"], "cats");
        req.min_cluster_size = 3;
        let result = pipeline.run(&req).unwrap();

        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].members, vec![0, 1, 2]);
        let examples = &result.labels[&ClusterId(0)].examples;
        assert_eq!(examples.len(), 2);
        assert!(examples.iter().all(|e| !e.to_lowercase().contains("telegram")));
    }

    #[test]
    fn test_counts_cover_every_item() {
        let texts: Vec<String> = (0..12).map(|i| format!("item {}", i)).collect();
        let vectors: Vec<Vec<f32>> = (0..12)
            .map(|i| {
                let group = (i % 3) as f32;
                vec![1.0 + group * 3.0, (i as f32) * 0.01, group, 0.5]
            })
            .collect();
        let pipeline = Pipeline::new(
            TableEmbedder::new(&[]),
            Arc::new(DisabledModel),
            PipelineOptions::default(),
        );

        let req = ClusterRequest::new(texts, "anything");
        let response = ClusterResponse::from(pipeline.run_with_vectors(&req, &vectors).unwrap());

        assert_eq!(response.labels.len(), 12);
        let expected_outliers: Vec<usize> = response
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == -1)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(response.outliers, expected_outliers);
        let clustered: usize = response.clusters.values().sum();
        assert_eq!(clustered + response.outliers.len(), 12);
    }

    #[test]
    fn test_repeated_runs_match() {
        let pipeline = Pipeline::new(
            TableEmbedder::new(&cat_dog_table()),
            Arc::new(DisabledModel),
            PipelineOptions::default(),
        );
        let a = pipeline.run(&cat_request()).unwrap();
        let b = pipeline.run(&cat_request()).unwrap();
        assert_eq!(a.assignment, b.assignment);
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_validation_happens_before_embedding() {
        let embedder = TableEmbedder::new(&cat_dog_table());
        let pipeline = Pipeline::new(embedder.clone(), Arc::new(DisabledModel), PipelineOptions::default());

        let err = pipeline.run(&request(&["only one"], "q")).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_oversized_request_is_rejected_before_embedding() {
        let embedder = TableEmbedder::new(&cat_dog_table());
        let pipeline = Pipeline::new(
            embedder.clone(),
            Arc::new(DisabledModel),
            PipelineOptions {
                max_texts: 3,
                ..PipelineOptions::default()
            },
        );

        let err = pipeline.run(&cat_request()).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("limit 3"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_embedding_failure_fails_the_request() {
        let pipeline = Pipeline::new(
            TableEmbedder::new(&cat_dog_table()),
            Arc::new(DisabledModel),
            PipelineOptions::default(),
        );
        let err = pipeline
            .run(&request(&["cat videos are fun", "never seen"], "q"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Embedding(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_vector_count_must_match_texts() {
        let pipeline = Pipeline::new(
            TableEmbedder::new(&[]),
            Arc::new(DisabledModel),
            PipelineOptions::default(),
        );
        let err = pipeline
            .run_with_vectors(&cat_request(), &[vec![1.0, 0.0]])
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Embedding(EmbeddingError::CountMismatch { expected: 4, found: 1 })
        ));
    }

    #[test]
    fn test_all_noise_skips_model() {
        let pipeline = Pipeline::new(
            TableEmbedder::new(&[]),
            Arc::new(TimeoutModel),
            PipelineOptions {
                allow_single_cluster: false,
                ..PipelineOptions::default()
            },
        );
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let req = request(&["a thing", "b thing", "c thing"], "q");
        let result = pipeline.run_with_vectors(&req, &vectors).unwrap();

        assert!(result.groups.is_empty());
        assert_eq!(result.gaps[0], GapFinding::NoStructure);
        assert_eq!(result.ideas, IdeaOutcome::Skipped);
    }

    /// Batches of small vectors plus clustering parameters.
    fn batch_strategy() -> impl Strategy<Value = (Vec<Vec<f32>>, usize, usize)> {
        (2usize..24, 1usize..6)
            .prop_flat_map(|(n, d)| {
                (
                    prop::collection::vec(prop::collection::vec(-4.0f32..4.0, d), n),
                    1usize..6,
                    1usize..5,
                )
            })
            .prop_map(|(mut vectors, mcs, ms)| {
                // Repeat a point so ties and zero distances show up
                if vectors.len() > 3 {
                    vectors[1] = vectors[0].clone();
                }
                (vectors, mcs, ms)
            })
    }

    fn run_batch(vectors: &[Vec<f32>], mcs: usize, ms: usize) -> PipelineResult {
        let pipeline = Pipeline::new(
            TableEmbedder::new(&[]),
            Arc::new(DisabledModel),
            PipelineOptions::default(),
        );
        let texts: Vec<String> = (0..vectors.len()).map(|i| format!("text {}", i)).collect();
        let mut req = ClusterRequest::new(texts, "anything");
        req.min_cluster_size = mcs;
        req.min_samples = ms;
        pipeline.run_with_vectors(&req, vectors).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_prop_response_accounts_for_every_item((vectors, mcs, ms) in batch_strategy()) {
            let n = vectors.len();
            let response = ClusterResponse::from(run_batch(&vectors, mcs, ms));

            prop_assert_eq!(response.labels.len(), n);
            let noise: Vec<usize> = response
                .labels
                .iter()
                .enumerate()
                .filter(|(_, l)| **l == -1)
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(&response.outliers, &noise);
            let clustered: usize = response.clusters.values().sum();
            prop_assert_eq!(clustered + response.outliers.len(), n);
            for (id, members) in &response.cluster_texts {
                prop_assert_eq!(response.clusters.get(id), Some(&members.len()));
                prop_assert!(members.iter().all(|&i| response.labels[i] == id.0 as i64));
            }
        }

        #[test]
        fn test_prop_gap_findings_follow_counts((vectors, mcs, ms) in batch_strategy()) {
            let n = vectors.len();
            let result = run_batch(&vectors, mcs, ms);
            let outliers = result.assignment.outliers().len();

            let no_structure = result.gaps.contains(&GapFinding::NoStructure);
            prop_assert_eq!(no_structure, result.groups.is_empty());

            let too_broad = result
                .gaps
                .iter()
                .any(|g| matches!(g, GapFinding::TooManyOutliers { .. }));
            prop_assert_eq!(too_broad, outliers as f64 / n as f64 > 0.4);

            let weak: Vec<ClusterId> = result
                .gaps
                .iter()
                .filter_map(|g| match g {
                    GapFinding::WeakCluster { id, .. } => Some(*id),
                    _ => None,
                })
                .collect();
            let expected: Vec<ClusterId> = result
                .groups
                .iter()
                .filter(|g| g.size() < 3)
                .map(|g| g.id)
                .collect();
            prop_assert_eq!(weak, expected);
        }

        #[test]
        fn test_prop_runs_are_repeatable((vectors, mcs, ms) in batch_strategy()) {
            let a = run_batch(&vectors, mcs, ms);
            let b = run_batch(&vectors, mcs, ms);
            prop_assert_eq!(a.assignment, b.assignment);
            prop_assert_eq!(a.labels, b.labels);
            prop_assert_eq!(a.gaps, b.gaps);
        }
    }
}
