//! Request parsing and response bodies.
//!
//! Request bodies are read as raw JSON and checked field by field, so a
//! client gets every missing or mistyped field in one `400` instead of the
//! first serde error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use stratus_core::{
    CoreError, FieldError, Image, Instance, InstanceType, Ipv4Cidr, NewImage, NewInstance,
    NewSubnet, NewVpc, ResourceId, Subnet, SubnetUpdate, Tags, Vpc, VpcUpdate,
};

// ============================================================================
// Field validation
// ============================================================================

/// Collects field errors while reading a JSON object.
pub struct FieldReader {
    object: Map<String, Value>,
    errors: Vec<FieldError>,
}

impl FieldReader {
    /// Parse a request body that must be a JSON object.
    pub fn parse(body: &[u8]) -> Result<Self, CoreError> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(CoreError::field("body", "request body is required"));
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| CoreError::field("body", format!("malformed JSON: {e}")))?;
        match value {
            Value::Object(object) => Ok(Self {
                object,
                errors: Vec::new(),
            }),
            _ => Err(CoreError::field("body", "must be a JSON object")),
        }
    }

    fn reject(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// A non-empty string that must be present.
    pub fn required_str(&mut self, field: &str) -> Option<String> {
        match self.object.get(field) {
            None | Some(Value::Null) => {
                self.reject(field, "is required");
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.reject(field, "must not be empty");
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.reject(field, "must be a string");
                None
            }
        }
    }

    /// A string that may be absent or null.
    pub fn optional_str(&mut self, field: &str) -> Option<String> {
        match self.object.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.reject(field, "must be a string");
                None
            }
        }
    }

    /// `tags`: an object of string values, absent meaning empty.
    pub fn tags(&mut self) -> Option<Tags> {
        match self.object.get("tags") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => {
                let mut tags = Tags::new();
                let mut bad = Vec::new();
                for (key, value) in map {
                    match value {
                        Value::String(s) => {
                            tags.insert(key.clone(), s.clone());
                        }
                        _ => bad.push(key.clone()),
                    }
                }
                for key in bad {
                    self.reject(&format!("tags.{key}"), "must be a string");
                }
                Some(tags)
            }
            Some(_) => {
                self.reject("tags", "must be an object of strings");
                None
            }
        }
    }

    /// Reject a field that may not be sent.
    pub fn forbid(&mut self, field: &str, message: &str) {
        if self.object.contains_key(field) {
            self.reject(field, message);
        }
    }

    /// Parse a string field with `FromStr`, reporting failures on that field.
    pub fn parse_with<T, F>(&mut self, field: &str, raw: Option<String>, parse: F) -> Option<T>
    where
        F: FnOnce(&str) -> Result<T, String>,
    {
        let raw = raw?;
        match parse(&raw) {
            Ok(value) => Some(value),
            Err(message) => {
                self.reject(field, message);
                None
            }
        }
    }

    /// Finish validation, producing `value` only if no field was rejected.
    pub fn finish<T>(self, value: impl FnOnce() -> Option<T>) -> Result<T, CoreError> {
        if !self.errors.is_empty() {
            return Err(CoreError::Validation(self.errors));
        }
        value().ok_or_else(|| CoreError::field("body", "invalid request"))
    }
}

// ============================================================================
// Requests
// ============================================================================

/// `POST /vpcs`
pub fn parse_create_vpc(body: &[u8]) -> Result<NewVpc, CoreError> {
    let mut r = FieldReader::parse(body)?;
    let name = r.required_str("name");
    let description = r.optional_str("description").unwrap_or_default();
    let raw_cidr = r.required_str("cidrBlock");
    let cidr_block = r.parse_with("cidrBlock", raw_cidr, |s| {
        s.trim().parse::<Ipv4Cidr>().map_err(|e| e.to_string())
    });
    let tags = r.tags().unwrap_or_default();

    r.finish(|| {
        Some(NewVpc {
            name: name?,
            description,
            cidr_block: cidr_block?,
            tags,
        })
    })
}

/// `PUT /vpcs/{id}`
pub fn parse_update_vpc(body: &[u8]) -> Result<VpcUpdate, CoreError> {
    let mut r = FieldReader::parse(body)?;
    r.forbid("cidrBlock", "is immutable");
    let name = r.optional_str("name");
    let description = r.optional_str("description");
    let tags = r.tags();

    r.finish(|| {
        Some(VpcUpdate {
            name,
            description,
            tags,
        })
    })
}

/// `PUT /subnets/:id`
pub fn parse_update_subnet(body: &[u8]) -> Result<SubnetUpdate, CoreError> {
    let mut r = FieldReader::parse(body)?;
    r.forbid("cidrBlock", "is immutable");
    r.forbid("vpcId", "is immutable");
    let name = r.optional_str("name");
    let description = r.optional_str("description");
    let tags = r.tags();

    r.finish(|| {
        Some(SubnetUpdate {
            name,
            description,
            tags,
        })
    })
}

/// `POST /subnets`
pub fn parse_create_subnet(body: &[u8]) -> Result<NewSubnet, CoreError> {
    let mut r = FieldReader::parse(body)?;
    let name = r.required_str("name");
    let description = r.optional_str("description").unwrap_or_default();
    let cidr_block = r.required_str("cidrBlock");
    let vpc_id = r.required_str("vpcId");
    let tags = r.tags().unwrap_or_default();

    r.finish(|| {
        Some(NewSubnet {
            name: name?,
            description,
            cidr_block: cidr_block?,
            vpc_id: ResourceId::from(vpc_id?),
            tags,
        })
    })
}

/// `POST /images`
pub fn parse_create_image(body: &[u8]) -> Result<NewImage, CoreError> {
    let mut r = FieldReader::parse(body)?;
    let description = r.optional_str("description").unwrap_or_default();
    let location = r.required_str("location");
    let operating_system = r.optional_str("operatingSystem");
    let tags = r.tags().unwrap_or_default();

    r.finish(|| {
        Some(NewImage {
            description,
            location: location?,
            operating_system,
            tags,
        })
    })
}

/// `POST /instances`
pub fn parse_create_instance(body: &[u8]) -> Result<NewInstance, CoreError> {
    let mut r = FieldReader::parse(body)?;
    let subnet_id = r.required_str("subnetId");
    let image_id = r.required_str("imageId");
    let raw_type = r.required_str("instanceType");
    let instance_type = r.parse_with("instanceType", raw_type, |s| {
        s.trim().parse::<InstanceType>().map_err(|e| match e {
            CoreError::Validation(mut fields) if !fields.is_empty() => fields.remove(0).message,
            other => other.to_string(),
        })
    });
    let tags = r.tags().unwrap_or_default();

    r.finish(|| {
        Some(NewInstance {
            subnet_id: ResourceId::from(subnet_id?),
            image_id: ResourceId::from(image_id?),
            instance_type: instance_type?,
            tags,
        })
    })
}

/// `?vpcId=` on `GET /subnets`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetFilter {
    pub vpc_id: Option<String>,
}

/// `?subnetId=` on `GET /instances`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceFilter {
    pub subnet_id: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct VpcList {
    pub vpcs: Vec<Vpc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubnetList {
    pub subnets: Vec<Subnet>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageList {
    pub images: Vec<Image>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceList {
    pub instances: Vec<Instance>,
}

/// `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// Record counts keyed by plural kind name.
    pub resources: BTreeMap<&'static str, usize>,
}
