// Copyright 2025 the archetype_query authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types

use std::fmt;

/// Query engine error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Entity handle failed generation validation or is not stored anywhere
    EntityNotFound,

    /// Component absent on the entity
    ComponentNotFound,

    /// Column or entity-table allocation failed; the world is unchanged
    AllocationFailed,

    /// A user predicate panicked during execution; the message is the
    /// panic payload of the first worker that failed
    PredicatePanic(String),

    /// Batch spawn size over the hard limit
    BatchTooLarge,

    /// More distinct component types registered than the signature width
    /// supports
    ComponentLimitExceeded,

    /// The async executor was shut down before the query completed
    Cancelled,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::EntityNotFound => write!(f, "Entity not found"),
            QueryError::ComponentNotFound => write!(f, "Component not found"),
            QueryError::AllocationFailed => write!(f, "Allocation failed"),
            QueryError::PredicatePanic(msg) => write!(f, "Predicate panicked: {msg}"),
            QueryError::BatchTooLarge => write!(f, "Batch size too large (max 10,000,000)"),
            QueryError::ComponentLimitExceeded => {
                write!(f, "Component type limit exceeded")
            }
            QueryError::Cancelled => write!(f, "Query cancelled"),
        }
    }
}

impl std::error::Error for QueryError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, QueryError>;
