//! Gene-tree topology proposals and realisation sampling for the paralogy workspace.
//!
//! Guest (gene) trees are perturbed inside a Metropolis–Hastings chain and
//! reconciled against a dated host (species) tree:
//!
//! - **Trees** — [`BinaryTree`] arena topology with snapshot/rollback, vertex maps, Newick I/O
//! - **Proposers** — [`TopologyProposer`] (NNI/SPR/reroot), [`BiasedTopologyProposer`]
//!   (parsimony-biased) and [`PoolResamplingProposer`] (draws from a [`TreePool`])
//! - **Reconciliation** — [`MprMap`] most-parsimonious guest-to-host mapping
//! - **Pseudogenes** — [`Pseudogenization`] switch legality and repair
//! - **Discretisation** — [`ArcDiscretiser`] slices host arcs into time points
//! - **Realisations** — [`sample_realisation`] and the [`RealisationSampler`] writer
//!
//! # Example
//!
//! ```
//! use paralogy_phylo::{newick, ChangeInfos, GuestState, Proposer, TopologyProposer};
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let nw = newick::parse("(((a,b),c),(d,e));").unwrap();
//! let mut state = GuestState::new(nw.tree.clone());
//! let mut proposer = TopologyProposer::new();
//! let mut rng = SmallRng::seed_from_u64(1);
//! let mut changes = ChangeInfos::new();
//!
//! let outcome = proposer.cache_and_perturb(&mut state, &mut rng, &mut changes);
//! assert!(!outcome.is_forced_reject());
//! assert!(state.tree.check_bifurcating());
//!
//! // The chain rejected: roll back.
//! proposer.restore_cache(&mut state);
//! assert_eq!(state.tree, nw.tree);
//! ```

pub mod biased_swap;
pub mod branch_swap;
pub mod config;
pub mod density;
pub mod discretiser;
pub mod maps;
pub mod names;
pub mod newick;
pub mod pool;
pub mod proposal;
pub mod pseudogene;
pub mod realisation;
pub mod reconciliation;
pub mod state;
pub mod tree;

// Re-export tree and map types
pub use maps::{DoubleMap, EdgeModel, TimesMap, VertexMap};
pub use names::{GuestHostMap, LeafKinds, NamesMap};
pub use tree::{BinaryTree, VertexId};

// Re-export configuration
pub use config::{
    BiasConfig, DiscretisationConfig, OperationWeights, PoolConfig, RetryLimits, MAX_ATTEMPTS,
    MAX_LIMIT, MAX_TRACKED_PARSIMONY_SCORE, PSEUDO_ODDS,
};

// Re-export proposal machinery
pub use biased_swap::{AcceptanceTable, BiasedTopologyProposer};
pub use branch_swap::{MoveKind, TopologyProposer};
pub use pool::{PoolEntry, PoolResamplingProposer, TreePool};
pub use proposal::{
    ChangeInfo, ChangeInfos, Parameter, Proposal, ProposalOutcome, Proposer, ProposerStatistics,
};
pub use state::GuestState;

// Re-export reconciliation and pseudogenization
pub use pseudogene::Pseudogenization;
pub use reconciliation::MprMap;

// Re-export discretisation and realisation sampling
pub use density::{DupLossProbs, GammaRateDensity, P11Table, RateDensity};
pub use discretiser::{ArcDiscretiser, DiscretePoint};
pub use realisation::{
    max_probability_realisation, sample_realisation, LowerLimit, Realisation, RealisationInputs,
    RealisationSampler, VertexType,
};
