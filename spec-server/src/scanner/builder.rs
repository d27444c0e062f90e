use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use utoipa::openapi::{
    ArrayBuilder, ComponentsBuilder, ContentBuilder, Deprecated, HttpMethod, Info, InfoBuilder,
    ObjectBuilder, OpenApi, OpenApiBuilder, Paths, Ref, RefOr, Required, Response,
    ResponseBuilder, Schema, SchemaFormat, Type,
    path::{Operation, OperationBuilder, Parameter, ParameterBuilder, ParameterIn},
    request_body::{RequestBody, RequestBodyBuilder},
    tag::{Tag, TagBuilder},
};

use super::{
    ScanError, ScanOptions,
    annotation::{Annotation, Value},
};

const JSON_CONTENT_TYPE: &str = "application/json";
const XML_CONTENT_TYPE: &str = "application/xml";

/// Accumulates annotations from every scanned file into one OpenAPI document.
pub(crate) struct DocumentBuilder<'a> {
    options: &'a ScanOptions,
    info: Option<Info>,
    paths: Paths,
    declared: HashMap<(String, HttpMethod), (PathBuf, usize)>,
    schemas: BTreeMap<String, (RefOr<Schema>, PathBuf, usize)>,
    tags: Vec<Tag>,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(options: &'a ScanOptions) -> Self {
        Self {
            options,
            info: None,
            paths: Paths::new(),
            declared: HashMap::new(),
            schemas: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    pub fn add(&mut self, file: &Path, annotation: &Annotation) -> Result<(), ScanError> {
        match annotation.name.as_str() {
            "OpenApi" | "Swagger" => {
                for child in annotation.nested() {
                    self.add(file, child)?;
                }
            }
            "Info" => {
                if self.info.is_none() {
                    self.info = Some(self.info_from(annotation));
                }
            }
            "Tag" => self.add_tag(file, annotation)?,
            "Schema" | "Definition" => self.add_schema(file, annotation)?,
            name => match http_method(name) {
                Some(method) => self.add_operation(file, annotation, method)?,
                None => tracing::debug!(
                    file = %file.display(),
                    line = annotation.line,
                    annotation = %label(annotation),
                    "ignoring top-level annotation"
                ),
            },
        }
        Ok(())
    }

    pub fn build(self) -> OpenApi {
        let info = self
            .info
            .unwrap_or_else(|| Info::new(self.options.title.clone(), self.options.version.clone()));
        let components = (!self.schemas.is_empty()).then(|| {
            self.schemas
                .into_iter()
                .fold(ComponentsBuilder::new(), |builder, (name, (schema, _, _))| {
                    builder.schema(name, schema)
                })
                .build()
        });

        OpenApiBuilder::new()
            .info(info)
            .paths(self.paths)
            .components(components)
            .tags((!self.tags.is_empty()).then_some(self.tags))
            .build()
    }

    fn info_from(&self, annotation: &Annotation) -> Info {
        InfoBuilder::new()
            .title(
                annotation
                    .string("title")
                    .unwrap_or_else(|| self.options.title.clone()),
            )
            .version(
                annotation
                    .string("version")
                    .unwrap_or_else(|| self.options.version.clone()),
            )
            .description(annotation.string("description"))
            .build()
    }

    fn add_tag(&mut self, file: &Path, annotation: &Annotation) -> Result<(), ScanError> {
        let Some(name) = annotation.string("name") else {
            return Err(invalid(file, annotation, format!("{} is missing name", label(annotation))));
        };
        if self.tags.iter().any(|tag| tag.name == name) {
            return Ok(());
        }
        self.tags.push(
            TagBuilder::new()
                .name(name)
                .description(annotation.string("description"))
                .build(),
        );
        Ok(())
    }

    fn add_schema(&mut self, file: &Path, annotation: &Annotation) -> Result<(), ScanError> {
        let Some(name) = annotation
            .string("schema")
            .or_else(|| annotation.string("definition"))
        else {
            return Err(invalid(
                file,
                annotation,
                format!("top-level {} needs a schema or definition name", label(annotation)),
            ));
        };
        if let Some((_, first_file, first_line)) = self.schemas.get(&name) {
            return Err(invalid(
                file,
                annotation,
                format!(
                    "schema '{name}' is already declared at {}:{first_line}",
                    first_file.display()
                ),
            ));
        }
        let schema = schema(file, annotation)?;
        self.schemas
            .insert(name, (schema, file.to_path_buf(), annotation.line));
        Ok(())
    }

    fn add_operation(
        &mut self,
        file: &Path,
        annotation: &Annotation,
        method: HttpMethod,
    ) -> Result<(), ScanError> {
        let Some(path) = annotation.string("path") else {
            return Err(invalid(file, annotation, format!("{} is missing path", label(annotation))));
        };
        let key = (path, method);
        if let Some((first_file, first_line)) = self.declared.get(&key) {
            return Err(invalid(
                file,
                annotation,
                format!(
                    "{} {} is already declared at {}:{first_line}",
                    annotation.name.to_uppercase(),
                    key.0,
                    first_file.display()
                ),
            ));
        }

        let operation = operation(file, annotation)?;
        self.paths
            .add_path_operation(&key.0, vec![key.1.clone()], operation);
        self.declared
            .insert(key, (file.to_path_buf(), annotation.line));
        Ok(())
    }
}

fn http_method(name: &str) -> Option<HttpMethod> {
    match name {
        "Get" => Some(HttpMethod::Get),
        "Post" => Some(HttpMethod::Post),
        "Put" => Some(HttpMethod::Put),
        "Patch" => Some(HttpMethod::Patch),
        "Delete" => Some(HttpMethod::Delete),
        "Head" => Some(HttpMethod::Head),
        "Options" => Some(HttpMethod::Options),
        _ => None,
    }
}

fn operation(file: &Path, annotation: &Annotation) -> Result<Operation, ScanError> {
    let tags = annotation.strings("tags");
    let mut builder = OperationBuilder::new()
        .tags((!tags.is_empty()).then_some(tags))
        .summary(annotation.string("summary"))
        .description(annotation.string("description"))
        .operation_id(annotation.string("operationId"))
        .deprecated(annotation.bool("deprecated").map(|value| {
            if value {
                Deprecated::True
            } else {
                Deprecated::False
            }
        }));

    for child in annotation.nested() {
        match child.name.as_str() {
            // Swagger 2 body parameters become the OpenAPI 3 request body.
            "Parameter" if child.string("in").as_deref() == Some("body") => {
                builder = builder.request_body(Some(request_body(file, child)?));
            }
            "Parameter" => {
                if let Some(parameter) = parameter(file, child)? {
                    builder = builder.parameter(parameter);
                }
            }
            "Response" => {
                let (code, response) = response(file, child)?;
                builder = builder.response(code, response);
            }
            "RequestBody" => {
                builder = builder.request_body(Some(request_body(file, child)?));
            }
            _ => tracing::debug!(
                file = %file.display(),
                line = child.line,
                annotation = %label(child),
                "ignoring operation child"
            ),
        }
    }

    Ok(builder.build())
}

fn parameter(file: &Path, annotation: &Annotation) -> Result<Option<Parameter>, ScanError> {
    let Some(name) = annotation.string("name") else {
        return Err(invalid(file, annotation, format!("{} is missing name", label(annotation))));
    };
    let location = match annotation.string("in").as_deref() {
        None | Some("query") => ParameterIn::Query,
        Some("path") => ParameterIn::Path,
        Some("header") => ParameterIn::Header,
        Some("cookie") => ParameterIn::Cookie,
        Some("formData") => {
            tracing::debug!(
                file = %file.display(),
                line = annotation.line,
                parameter = %name,
                "ignoring formData parameter"
            );
            return Ok(None);
        }
        Some(other) => {
            return Err(invalid(
                file,
                annotation,
                format!("parameter '{name}' has unsupported location '{other}'"),
            ));
        }
    };
    let required = location == ParameterIn::Path || annotation.bool("required").unwrap_or(false);
    let schema = match body_schema(file, annotation)? {
        Some((_, schema)) => Some(schema),
        None if annotation.get("type").is_some() => Some(schema(file, annotation)?),
        None => None,
    };

    Ok(Some(
        ParameterBuilder::new()
            .name(name)
            .parameter_in(location)
            .required(if required {
                Required::True
            } else {
                Required::False
            })
            .description(annotation.string("description"))
            .schema(schema)
            .build(),
    ))
}

fn response(file: &Path, annotation: &Annotation) -> Result<(String, Response), ScanError> {
    let code = annotation
        .string("response")
        .unwrap_or_else(|| "default".to_string());
    let mut builder =
        ResponseBuilder::new().description(annotation.string("description").unwrap_or_default());
    if let Some((content_type, schema)) = body_schema(file, annotation)? {
        builder = builder.content(content_type, ContentBuilder::new().schema(Some(schema)).build());
    }
    Ok((code, builder.build()))
}

fn request_body(file: &Path, annotation: &Annotation) -> Result<RequestBody, ScanError> {
    let mut builder = RequestBodyBuilder::new()
        .description(annotation.string("description"))
        .required(annotation.bool("required").map(|value| {
            if value {
                Required::True
            } else {
                Required::False
            }
        }));
    if let Some((content_type, schema)) = body_schema(file, annotation)? {
        builder = builder.content(content_type, ContentBuilder::new().schema(Some(schema)).build());
    }
    Ok(builder.build())
}

/// Schema carried by a response, request body or parameter: a `ref=` shortcut, or a nested
/// `Schema`, `JsonContent`, `XmlContent` or `MediaType`.
fn body_schema(
    file: &Path,
    annotation: &Annotation,
) -> Result<Option<(String, RefOr<Schema>)>, ScanError> {
    if let Some(reference) = annotation.string("ref") {
        return Ok(Some((
            JSON_CONTENT_TYPE.to_string(),
            RefOr::Ref(schema_ref(&reference)),
        )));
    }
    for child in annotation.nested() {
        match child.name.as_str() {
            "Schema" | "JsonContent" => {
                return Ok(Some((JSON_CONTENT_TYPE.to_string(), schema(file, child)?)));
            }
            "XmlContent" => {
                return Ok(Some((XML_CONTENT_TYPE.to_string(), schema(file, child)?)));
            }
            "MediaType" => {
                let content_type = child
                    .string("mediaType")
                    .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());
                let schema = match child.nested_named(&["Schema"]).next() {
                    Some(nested) => schema(file, nested)?,
                    None => RefOr::T(Schema::Object(ObjectBuilder::new().build())),
                };
                return Ok(Some((content_type, schema)));
            }
            _ => {}
        }
    }
    Ok(None)
}

fn schema(file: &Path, annotation: &Annotation) -> Result<RefOr<Schema>, ScanError> {
    if let Some(reference) = annotation.string("ref") {
        return Ok(RefOr::Ref(schema_ref(&reference)));
    }
    let description = annotation.string("description");
    let title = annotation.string("title");

    if annotation.string("type").as_deref() == Some("array") {
        let mut builder = ArrayBuilder::new().description(description).title(title);
        if let Some(items) = annotation.nested_named(&["Items"]).next() {
            builder = builder.items(schema(file, items)?);
        }
        return Ok(RefOr::T(Schema::Array(builder.build())));
    }

    let mut builder = ObjectBuilder::new()
        .description(description)
        .title(title)
        .format(annotation.string("format").map(SchemaFormat::Custom));
    if let Some(kind) = annotation.string("type") {
        builder = builder.schema_type(schema_type(file, annotation, &kind)?);
    }
    if let Some(example) = annotation.get("example").and_then(Value::to_json) {
        builder = builder.examples([example]);
    }
    if let Some(serde_json::Value::Array(values)) =
        annotation.get("enum").and_then(Value::to_json)
    {
        builder = builder.enum_values(Some(values));
    }
    if let Some(Value::List(_)) = annotation.get("required") {
        for field in annotation.strings("required") {
            builder = builder.required(field);
        }
    }
    for property in annotation.nested_named(&["Property"]) {
        let Some(name) = property.string("property") else {
            return Err(invalid(file, property, format!("{} is missing property", label(property))));
        };
        builder = builder.property(name, schema(file, property)?);
    }

    Ok(RefOr::T(Schema::Object(builder.build())))
}

fn schema_type(file: &Path, annotation: &Annotation, kind: &str) -> Result<Type, ScanError> {
    match kind {
        "object" => Ok(Type::Object),
        "string" => Ok(Type::String),
        "integer" => Ok(Type::Integer),
        "number" => Ok(Type::Number),
        "boolean" => Ok(Type::Boolean),
        "null" => Ok(Type::Null),
        other => Err(invalid(
            file,
            annotation,
            format!("unsupported schema type '{other}'"),
        )),
    }
}

/// `#/definitions/User`, `#/components/schemas/User` and `User` all point at the same component.
fn schema_ref(raw: &str) -> Ref {
    let name = raw
        .strip_prefix("#/definitions/")
        .or_else(|| raw.strip_prefix("#/components/schemas/"))
        .unwrap_or(raw);
    if name.starts_with('#') || name.contains('/') {
        Ref::new(raw)
    } else {
        Ref::from_schema_name(name)
    }
}

fn label(annotation: &Annotation) -> String {
    format!("@{}\\{}", annotation.namespace, annotation.name)
}

fn invalid(file: &Path, annotation: &Annotation, message: impl Into<String>) -> ScanError {
    ScanError::Invalid {
        path: file.to_path_buf(),
        line: annotation.line,
        message: message.into(),
    }
}
