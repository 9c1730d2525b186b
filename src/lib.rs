//! grid_nav
//! ========
//!
//! A library of 2D grid pathfinding and spatial field algorithms over a shared
//! grid model: a flat, row-major array of cell states viewed through [Grid].
//! Four planners cooperate on that model: [AStarPathfinder] for optimal
//! grid-step paths, [ThetaStarPathfinder] for any-angle paths via line-of-sight
//! parent relaxation, [HpaPathfinder] for hierarchical search over a cluster
//! graph, and [FlowFieldGenerator] for many-agent goal seeking through
//! integration and flow fields.
//!
//! Cross-cutting services are shared by all planners: input [validation
//! reports](ValidationReport), a bounded fingerprint-keyed [ResultCache],
//! interchangeable line-of-sight primitives ([line_of_sight]), path
//! post-processing ([optimize_path]) and result/field comparison utilities.
//!
//! The grid is borrowed read-only per call and never mutated or retained.
//! Planner instances own their configuration, statistics and cache, and are
//! not thread-safe; distinct instances may run in parallel.

mod astar;
mod cache;
mod cell;
mod compare;
mod config;
mod direction;
mod flow_field;
mod hpa;
mod los;
mod math;
mod optimize;
mod result;
mod stats;
mod theta_star;
mod validation;

pub use self::{
    astar::*, cache::*, cell::*, compare::*, config::*, direction::*, flow_field::*, hpa::*,
    los::*, math::*, optimize::*, result::*, stats::*, theta_star::*, validation::*,
};
