use thiserror::Error;

/// Errors raised while turning operation text into a [`Query`](crate::query::Query).
#[derive(Debug, Error)]
pub enum QueryError {
    /// The document is not valid GraphQL.
    #[error("failed to parse query: {0}")]
    Parse(#[from] graphql_parser::query::ParseError),

    /// No operation with the requested name, or no operation at all.
    #[error("unknown operation {0}")]
    UnknownOperation(String),

    /// Several operations and no operation name to pick one.
    #[error("document contains several operations, an operation name is required")]
    AmbiguousOperation,

    /// Subscriptions cannot be federated.
    #[error("subscriptions are not supported")]
    Subscription,

    /// A spread names a fragment the document does not define.
    #[error("unknown fragment {0}")]
    UnknownFragment(String),

    /// A fragment spreads itself, directly or through other fragments.
    #[error("fragment {0} spreads itself")]
    FragmentCycle(String),

    /// A non-null variable without default was not supplied.
    #[error("missing value for variable ${0}")]
    MissingVariable(String),

    /// A variable is used but never declared.
    #[error("undeclared variable ${0}")]
    UndeclaredVariable(String),

    /// `@skip`/`@include` without a boolean `if` argument.
    #[error("directive @{0} requires a boolean `if` argument")]
    InvalidDirective(String),
}

/// Errors raised while building a [`Schema`](crate::schema::Schema) description.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The SDL is not valid GraphQL.
    #[error("failed to parse schema: {0}")]
    Parse(#[from] graphql_parser::schema::ParseError),

    /// The introspection payload could not be decoded.
    #[error("failed to decode introspection result: {0}")]
    Decode(#[from] serde_json::Error),

    /// The service answered the introspection query with errors.
    #[error("introspection failed: {0}")]
    Introspection(String),

    /// A type reference is missing its name or wrapped type.
    #[error("malformed type reference in {0}")]
    MalformedTypeRef(String),

    /// `extend` of something other than an object or interface type.
    #[error("unsupported type extension of {0}")]
    UnsupportedExtension(String),

    /// An extension targets a type the document never defines.
    #[error("extension of undefined type {0}")]
    UndefinedExtension(String),
}

/// Composition errors, fatal to gateway startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompositionError {
    /// Two services were registered under the same name.
    #[error("service {0} registered twice")]
    DuplicateService(String),

    /// The same type name is declared with different kinds.
    #[error("type {type_name} is {first_kind} in service {first} but {second_kind} in service {second}")]
    KindConflict {
        type_name: String,
        first: String,
        first_kind: String,
        second: String,
        second_kind: String,
    },

    /// The same field is declared with different shapes.
    #[error("field {type_name}.{field} has conflicting definitions in services {first} and {second}")]
    FieldConflict {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    /// The same input field is declared with different types.
    #[error("input field {type_name}.{field} has conflicting types in services {first} and {second}")]
    InputFieldConflict {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    /// A service's `_federation` root field does not return an object type.
    #[error("service {service} declares _federation with non-object type {type_name}")]
    InvalidEntryPoint { service: String, type_name: String },

    /// A `_federation` field is not of the form `T(keys: [..]): [T]`.
    #[error("service {service} declares malformed _federation entry {field}, expected {field}(keys: [...]): [{field}]")]
    MalformedEntryPoint { service: String, field: String },

    /// Crossing from one service to another has no key both declare.
    #[error("type {type_name} crosses from service {from} to {to} but has no agreed key field")]
    MissingKey {
        type_name: String,
        from: String,
        to: String,
    },

    /// The owning service cannot re-enter the type by key.
    #[error("service {service} owns fields of {type_name} but exposes no _federation entry point for it")]
    MissingEntryPoint { type_name: String, service: String },
}

/// Planning errors, reported per request before anything is executed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanningError {
    /// The operation kind has no root type in the composed schema.
    #[error("schema has no root type for {0} operations")]
    MissingRootType(String),

    /// A type name the composed schema does not know.
    #[error("unknown type {0}")]
    UnknownType(String),

    /// A field the type does not declare.
    #[error("unknown field {type_name}.{field}")]
    UnknownField { type_name: String, field: String },

    /// A field with no resolvable owner.
    #[error("no service resolves field {type_name}.{field}")]
    UnresolvedField { type_name: String, field: String },

    /// A crossing the flattened index has no key for.
    #[error("no key to cross type {type_name} from service {from} to {to}")]
    UnresolvedKey {
        type_name: String,
        from: String,
        to: String,
    },

    /// An argument the field does not declare.
    #[error("unknown argument {argument} on field {type_name}.{field}")]
    UnknownArgument {
        type_name: String,
        field: String,
        argument: String,
    },

    /// A required argument without value.
    #[error("missing required argument {argument} on field {type_name}.{field}")]
    MissingArgument {
        type_name: String,
        field: String,
        argument: String,
    },

    /// An argument value that does not fit the declared input type.
    #[error("argument {argument} on field {type_name}.{field} expects {expected}")]
    ArgumentMismatch {
        type_name: String,
        field: String,
        argument: String,
        expected: String,
    },

    /// A composite field queried without selections.
    #[error("field {type_name}.{field} of type {field_type} must have a selection of subfields")]
    MissingSelection {
        type_name: String,
        field: String,
        field_type: String,
    },

    /// A leaf field queried with selections.
    #[error("field {type_name}.{field} of type {field_type} cannot have a selection of subfields")]
    UnexpectedSelection {
        type_name: String,
        field: String,
        field_type: String,
    },

    /// A fragment that can never apply where it is spread.
    #[error("fragment on {on} can never apply to {within}")]
    InvalidFragment { on: String, within: String },

    /// Top-level mutation fields owned by several services.
    #[error("mutation fields span several services: {}", .0.join(", "))]
    MutationAcrossServices(Vec<String>),

    /// Response keys starting with `__federation` are used for correlation.
    #[error("response key {0} is reserved")]
    ReservedResponseKey(String),
}

/// Shape errors found while following a path through a fetched result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FollowError {
    /// Raised below a list element.
    #[error("idx {index}: {source}")]
    Index {
        index: usize,
        #[source]
        source: Box<FollowError>,
    },

    /// Raised below a field.
    #[error("field {name}: {source}")]
    Field {
        name: String,
        #[source]
        source: Box<FollowError>,
    },

    /// Raised below a type restriction.
    #[error("type {name}: {source}")]
    Type {
        name: String,
        #[source]
        source: Box<FollowError>,
    },

    /// The object lacks a field the path descends into.
    #[error("does not have key {0}")]
    MissingField(String),

    /// A scalar where an object was expected.
    #[error("not an object: {0}")]
    NotAnObject(String),

    /// A type restriction against an object reporting no type name.
    #[error("does not have string key __typename")]
    MissingTypename,

    /// The path ended on an object without a correlation marker.
    #[error("missing {marker}: {object}")]
    MissingMarker { marker: &'static str, object: String },
}

/// Errors raised by an [`ExecutorClient`](crate::executor_client::ExecutorClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or its body not read.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("service answered with status {0}")]
    Status(u16),

    /// The request context was cancelled before an answer arrived.
    #[error("request cancelled")]
    Cancelled,
}

/// Errors raised while executing a plan.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The plan targets a service with no registered client.
    #[error("no executor registered for service {0}")]
    UnknownService(String),

    /// The service's execute capability failed.
    #[error("executing on service {service}: {source}")]
    Transport {
        service: String,
        #[source]
        source: ClientError,
    },

    /// The service answered with bytes that are not a GraphQL response.
    #[error("decoding response of service {service}: {source}")]
    Decode {
        service: String,
        #[source]
        source: serde_json::Error,
    },

    /// The service answered with GraphQL errors.
    #[error("service {service} returned errors: {message}")]
    Service { service: String, message: String },

    /// The service answered with data of an unexpected shape.
    #[error("unexpected response shape from service {service}: {message}")]
    Shape { service: String, message: String },

    /// A child plan's path does not match its parent's result.
    #[error("following path for service {service}: {source}")]
    Follow {
        service: String,
        #[source]
        source: FollowError,
    },

    /// A re-entry fetch answered a different number of objects than keys sent.
    #[error("got {actual} results for {expected} targets from service {service}")]
    ResultCount {
        service: String,
        expected: usize,
        actual: usize,
    },

    /// The request context was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// A child task panicked.
    #[error("sub plan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors raised while loading the gateway configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for the expected shape.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A routing URL could not be parsed.
    #[error("invalid routing url for subgraph {subgraph}: {url}")]
    InvalidUrl { subgraph: String, url: String },
}

/// Top-level gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A configured service uses a name reserved by the gateway.
    #[error("service name {0} is reserved")]
    ReservedService(String),

    /// Fetching a service's schema failed.
    #[error("fetching schema {service}: {source}")]
    Fetch {
        service: String,
        #[source]
        source: ExecutionError,
    },

    /// A service's schema could not be decoded.
    #[error("decoding schema {service}: {source}")]
    Schema {
        service: String,
        #[source]
        source: SchemaError,
    },

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
