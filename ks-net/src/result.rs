use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

use crate::param::LayerParam;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// The node an error is about.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Node<S = String> {
    pub name: S,
    pub layer_type: S,
}

#[derive(Debug)]
pub enum NetworkError {
    IO(PathBuf, io::Error),
    Parse(Option<PathBuf>, serde_json::Error),

    /// The operation requires a successfully loaded network.
    Empty,

    UnknownLayerType(Node),
    UnsupportedLayerType(Node),
    InvalidParam(Node, String),

    MissingWeight(Node, usize),
    WeightsExhausted(Node, usize),

    DanglingSource(Node, usize, String),
    DuplicateDestination(Node, String),
    InvalidInputStage(Node),

    ShapeCountMismatch(usize, usize),
    UnknownInput(String),
    UnknownOutput(String),

    InvalidShape(Node, String),
    InvalidTensor(String),
}

impl NetworkError {
    /// Whether this error was raised while linking tensors between nodes.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            NetworkError::DanglingSource(..) | NetworkError::DuplicateDestination(..) | NetworkError::InvalidInputStage(..)
        )
    }
}

pub trait ToNetworkResult {
    type T;
    fn to_network_result(self, path: impl AsRef<Path>) -> NetworkResult<Self::T>;
}

impl<T> ToNetworkResult for Result<T, io::Error> {
    type T = T;
    fn to_network_result(self, path: impl AsRef<Path>) -> NetworkResult<T> {
        self.map_err(|e| NetworkError::IO(path.as_ref().to_owned(), e))
    }
}

impl<S: AsRef<str>> Node<S> {
    pub fn to_owned(&self) -> Node<String> {
        Node {
            name: self.name.as_ref().to_owned(),
            layer_type: self.layer_type.as_ref().to_owned(),
        }
    }
}

impl From<&LayerParam> for Node {
    fn from(param: &LayerParam) -> Self {
        Node {
            name: param.name.clone(),
            layer_type: param.layer_type.clone(),
        }
    }
}

impl Display for NetworkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for NetworkError {}
