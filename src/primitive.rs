//! Request and response primitives
//!
//! The unit of work of the engine. A [`RequestPrimitive`] carries the
//! operation, originator, target address, and optional payload/filter
//! parameters; a [`ResponsePrimitive`] carries a status code, an optional
//! payload, and the echoed request id. Both are transient, created per call,
//! never persisted.
//!
//! Field names are descriptive Rust identifiers; the serde renames produce
//! the oneM2M short-name wire vocabulary (`op`, `fr`, `to`, `rqi`, `pc`, ...).

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Operation
// =============================================================================

/// Request operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Retrieve,
    Update,
    Delete,
    Notify,
}

impl Operation {
    /// Numeric wire code.
    pub fn code(&self) -> u8 {
        match self {
            Operation::Create => 1,
            Operation::Retrieve => 2,
            Operation::Update => 3,
            Operation::Delete => 4,
            Operation::Notify => 5,
        }
    }

    /// Parse a numeric wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Operation::Create),
            2 => Some(Operation::Retrieve),
            3 => Some(Operation::Update),
            4 => Some(Operation::Delete),
            5 => Some(Operation::Notify),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Retrieve => write!(f, "retrieve"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Notify => write!(f, "notify"),
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Operation::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown operation code: {}", code)))
    }
}

// =============================================================================
// Status Codes
// =============================================================================

/// Response status codes shared across the engine and its collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Created,
    Deleted,
    Updated,
    BadRequest,
    NotFound,
    OperationNotAllowed,
    NoPrivilege,
    Conflict,
    InvalidChildType,
    AlreadyRegistered,
    InternalServerError,
    NotImplemented,
    AlreadyExists,
    TargetNotSubscribable,
    NotAcceptable,
}

impl StatusCode {
    /// Numeric wire code.
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 2000,
            StatusCode::Created => 2001,
            StatusCode::Deleted => 2002,
            StatusCode::Updated => 2004,
            StatusCode::BadRequest => 4000,
            StatusCode::NotFound => 4004,
            StatusCode::OperationNotAllowed => 4005,
            StatusCode::NoPrivilege => 4103,
            StatusCode::Conflict => 4105,
            StatusCode::InvalidChildType => 4108,
            StatusCode::AlreadyRegistered => 4117,
            StatusCode::InternalServerError => 5000,
            StatusCode::NotImplemented => 5001,
            StatusCode::AlreadyExists => 5106,
            StatusCode::TargetNotSubscribable => 5203,
            StatusCode::NotAcceptable => 5207,
        }
    }

    /// Parse a numeric wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            2000 => Some(StatusCode::Ok),
            2001 => Some(StatusCode::Created),
            2002 => Some(StatusCode::Deleted),
            2004 => Some(StatusCode::Updated),
            4000 => Some(StatusCode::BadRequest),
            4004 => Some(StatusCode::NotFound),
            4005 => Some(StatusCode::OperationNotAllowed),
            4103 => Some(StatusCode::NoPrivilege),
            4105 => Some(StatusCode::Conflict),
            4108 => Some(StatusCode::InvalidChildType),
            4117 => Some(StatusCode::AlreadyRegistered),
            5000 => Some(StatusCode::InternalServerError),
            5001 => Some(StatusCode::NotImplemented),
            5106 => Some(StatusCode::AlreadyExists),
            5203 => Some(StatusCode::TargetNotSubscribable),
            5207 => Some(StatusCode::NotAcceptable),
            _ => None,
        }
    }

    /// True for the 2xxx success family.
    pub fn is_success(&self) -> bool {
        self.code() < 4000
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u16::deserialize(deserializer)?;
        StatusCode::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown status code: {}", code)))
    }
}

// =============================================================================
// Resource Types
// =============================================================================

/// Resource kind tag.
///
/// Numeric values follow the standard type enumeration; the three-figure
/// values cover the model/dataset extension kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    AccessControlPolicy,
    ApplicationEntity,
    Container,
    ContentInstance,
    CseBase,
    Group,
    RemoteCse,
    Subscription,
    FlexContainer,
    ModelRepo,
    MlModel,
    ModelDeployments,
    Deployment,
    Dataset,
    DatasetFragment,
}

impl ResourceType {
    /// Numeric wire code.
    pub fn code(&self) -> u16 {
        match self {
            ResourceType::AccessControlPolicy => 1,
            ResourceType::ApplicationEntity => 2,
            ResourceType::Container => 3,
            ResourceType::ContentInstance => 4,
            ResourceType::CseBase => 5,
            ResourceType::Group => 9,
            ResourceType::RemoteCse => 16,
            ResourceType::Subscription => 23,
            ResourceType::FlexContainer => 28,
            ResourceType::ModelRepo => 101,
            ResourceType::MlModel => 102,
            ResourceType::ModelDeployments => 103,
            ResourceType::Deployment => 104,
            ResourceType::Dataset => 106,
            ResourceType::DatasetFragment => 107,
        }
    }

    /// Parse a numeric wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(ResourceType::AccessControlPolicy),
            2 => Some(ResourceType::ApplicationEntity),
            3 => Some(ResourceType::Container),
            4 => Some(ResourceType::ContentInstance),
            5 => Some(ResourceType::CseBase),
            9 => Some(ResourceType::Group),
            16 => Some(ResourceType::RemoteCse),
            23 => Some(ResourceType::Subscription),
            28 => Some(ResourceType::FlexContainer),
            101 => Some(ResourceType::ModelRepo),
            102 => Some(ResourceType::MlModel),
            103 => Some(ResourceType::ModelDeployments),
            104 => Some(ResourceType::Deployment),
            106 => Some(ResourceType::Dataset),
            107 => Some(ResourceType::DatasetFragment),
            _ => None,
        }
    }

    /// Short name used in resource representations (`m2m:<short>`).
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceType::AccessControlPolicy => "acp",
            ResourceType::ApplicationEntity => "ae",
            ResourceType::Container => "cnt",
            ResourceType::ContentInstance => "cin",
            ResourceType::CseBase => "cb",
            ResourceType::Group => "grp",
            ResourceType::RemoteCse => "csr",
            ResourceType::Subscription => "sub",
            ResourceType::FlexContainer => "flx",
            ResourceType::ModelRepo => "mrp",
            ResourceType::MlModel => "mmd",
            ResourceType::ModelDeployments => "mdp",
            ResourceType::Deployment => "dpm",
            ResourceType::Dataset => "dts",
            ResourceType::DatasetFragment => "dsf",
        }
    }

    /// True for kinds that keep an append-ordered, capacity-bounded child list.
    pub fn has_ordered_children(&self) -> bool {
        matches!(
            self,
            ResourceType::Container
                | ResourceType::ModelRepo
                | ResourceType::ModelDeployments
                | ResourceType::Dataset
        )
    }

    /// The owning kind when this kind is an ordered-list member.
    pub fn list_parent(&self) -> Option<ResourceType> {
        match self {
            ResourceType::ContentInstance => Some(ResourceType::Container),
            ResourceType::MlModel => Some(ResourceType::ModelRepo),
            ResourceType::Deployment => Some(ResourceType::ModelDeployments),
            ResourceType::DatasetFragment => Some(ResourceType::Dataset),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u16::deserialize(deserializer)?;
        ResourceType::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown resource type code: {}", code)))
    }
}

// =============================================================================
// Filter Criteria & Result Content
// =============================================================================

/// How a retrieve target is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterUsage {
    /// Discovery: collect matching descendant addresses
    Discovery,
    /// Conditional retrieval of the addressed resource (default)
    Conditional,
}

impl FilterUsage {
    pub fn code(&self) -> u8 {
        match self {
            FilterUsage::Discovery => 1,
            FilterUsage::Conditional => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FilterUsage::Discovery),
            2 => Some(FilterUsage::Conditional),
            _ => None,
        }
    }
}

impl Serialize for FilterUsage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for FilterUsage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        FilterUsage::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown filter usage code: {}", code)))
    }
}

/// Filter criteria attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Filter usage; conditional retrieval when omitted
    #[serde(rename = "fu", skip_serializing_if = "Option::is_none")]
    pub usage: Option<FilterUsage>,

    /// Resource type filter (discovery)
    #[serde(rename = "ty", skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<Vec<ResourceType>>,

    /// Label filter (discovery)
    #[serde(rename = "lbl", skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            usage: Some(FilterUsage::Conditional),
            resource_types: None,
            labels: None,
        }
    }
}

impl FilterCriteria {
    /// Effective filter usage (conditional when unset).
    pub fn effective_usage(&self) -> FilterUsage {
        self.usage.unwrap_or(FilterUsage::Conditional)
    }

    /// True when this is a pure discovery retrieval.
    pub fn is_discovery(&self) -> bool {
        self.effective_usage() == FilterUsage::Discovery
    }
}

/// Result content option: what the response payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultContent {
    /// No payload
    Nothing,
    /// Attributes of the addressed resource (default for C/R/U)
    Attributes,
    /// Attributes plus direct child references
    AttributesAndChildren,
    /// Child references only
    ChildrenOnly,
}

impl ResultContent {
    pub fn code(&self) -> u8 {
        match self {
            ResultContent::Nothing => 0,
            ResultContent::Attributes => 1,
            ResultContent::AttributesAndChildren => 4,
            ResultContent::ChildrenOnly => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResultContent::Nothing),
            1 => Some(ResultContent::Attributes),
            4 => Some(ResultContent::AttributesAndChildren),
            8 => Some(ResultContent::ChildrenOnly),
            _ => None,
        }
    }
}

impl Serialize for ResultContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for ResultContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        ResultContent::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown result content code: {}", code)))
    }
}

// =============================================================================
// Request Primitive
// =============================================================================

/// Inbound unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPrimitive {
    /// Operation kind
    #[serde(rename = "op")]
    pub operation: Operation,

    /// Originator identifier
    #[serde(rename = "fr")]
    pub originator: String,

    /// Target address (absolute, peer-relative, or local-relative)
    #[serde(rename = "to")]
    pub target: String,

    /// Caller-supplied request id, echoed verbatim in the response
    #[serde(rename = "rqi")]
    pub request_id: String,

    /// Resource type tag (mandatory for create)
    #[serde(rename = "ty", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,

    /// Payload (resource representation or notification body)
    #[serde(rename = "pc", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Filter criteria
    #[serde(rename = "fc", skip_serializing_if = "Option::is_none")]
    pub filter_criteria: Option<FilterCriteria>,

    /// Result content option
    #[serde(rename = "rcn", skip_serializing_if = "Option::is_none")]
    pub result_content: Option<ResultContent>,

    /// Protocol release version indicator
    #[serde(rename = "rvi", skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
}

impl RequestPrimitive {
    /// Fill in defaulted parameters.
    ///
    /// Missing filter criteria default to conditional retrieval; a missing
    /// result content option defaults by operation kind (attributes for
    /// create/retrieve/update, nothing for delete).
    pub fn normalize_defaults(&mut self) {
        let fc = self.filter_criteria.get_or_insert_with(FilterCriteria::default);
        if fc.usage.is_none() {
            fc.usage = Some(FilterUsage::Conditional);
        }

        if self.result_content.is_none() {
            self.result_content = Some(match self.operation {
                Operation::Create | Operation::Retrieve | Operation::Update => {
                    ResultContent::Attributes
                }
                Operation::Delete => ResultContent::Nothing,
                Operation::Notify => ResultContent::Nothing,
            });
        }
    }

    /// Effective filter criteria (defaults applied).
    pub fn effective_filter(&self) -> FilterCriteria {
        self.filter_criteria.clone().unwrap_or_default()
    }

    /// Effective result content (defaults applied).
    pub fn effective_result_content(&self) -> ResultContent {
        self.result_content.unwrap_or(match self.operation {
            Operation::Delete | Operation::Notify => ResultContent::Nothing,
            _ => ResultContent::Attributes,
        })
    }

    // Builders used by fan-out and the test suites.

    pub fn retrieve(originator: impl Into<String>, target: impl Into<String>) -> Self {
        Self::bare(Operation::Retrieve, originator, target)
    }

    pub fn create(
        originator: impl Into<String>,
        target: impl Into<String>,
        resource_type: ResourceType,
        payload: Value,
    ) -> Self {
        let mut req = Self::bare(Operation::Create, originator, target);
        req.resource_type = Some(resource_type);
        req.payload = Some(payload);
        req
    }

    pub fn update(
        originator: impl Into<String>,
        target: impl Into<String>,
        payload: Value,
    ) -> Self {
        let mut req = Self::bare(Operation::Update, originator, target);
        req.payload = Some(payload);
        req
    }

    pub fn delete(originator: impl Into<String>, target: impl Into<String>) -> Self {
        Self::bare(Operation::Delete, originator, target)
    }

    fn bare(operation: Operation, originator: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            operation,
            originator: originator.into(),
            target: target.into(),
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            resource_type: None,
            payload: None,
            filter_criteria: None,
            result_content: None,
            release_version: None,
        }
    }
}

// =============================================================================
// Response Primitive
// =============================================================================

/// Outbound unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePrimitive {
    /// Status code
    #[serde(rename = "rsc")]
    pub status: StatusCode,

    /// Echoed request id
    #[serde(rename = "rqi")]
    pub request_id: String,

    /// Protocol release version indicator
    #[serde(rename = "rvi", skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,

    /// Payload
    #[serde(rename = "pc", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Responding member id, set on fan-out aggregate entries
    #[serde(rename = "fr", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ResponsePrimitive {
    pub fn new(status: StatusCode, request_id: impl Into<String>) -> Self {
        Self {
            status,
            request_id: request_id.into(),
            release_version: None,
            payload: None,
            source: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Error response carrying debug text in the standard `m2m:dbg` shape.
    pub fn error(status: StatusCode, request_id: impl Into<String>, debug: impl Into<String>) -> Self {
        Self::new(status, request_id)
            .with_payload(serde_json::json!({ "m2m:dbg": debug.into() }))
    }
}

// =============================================================================
// Tests
// =============================================================================
