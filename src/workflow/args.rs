//! Call model for tracked functions: keyword arguments are either image
//! references or plain data, and results are nothing, one value or a tuple.

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use super::image::{Image, ImageHandle};

/// Signature every tracked function implements.
pub type TaskCallable = Arc<dyn Fn(&CallArgs) -> anyhow::Result<Returned> + Send + Sync>;

/// A single argument or returned value.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Reference to an image artifact, recorded by its unique name
    Image(ImageHandle),
    /// Plain data: numbers, strings, booleans, sequences
    Param(Value),
}

impl Arg {
    pub fn as_image(&self) -> Option<&ImageHandle> {
        match self {
            Arg::Image(image) => Some(image),
            Arg::Param(_) => None,
        }
    }

    pub fn as_param(&self) -> Option<&Value> {
        match self {
            Arg::Param(value) => Some(value),
            Arg::Image(_) => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Arg::Image(_) => "image",
            Arg::Param(Value::Null) => "null",
            Arg::Param(Value::Bool(_)) => "bool",
            Arg::Param(Value::Number(_)) => "number",
            Arg::Param(Value::String(_)) => "string",
            Arg::Param(Value::Array(_)) => "sequence",
            Arg::Param(Value::Object(_)) => "mapping",
        }
    }
}

impl From<ImageHandle> for Arg {
    fn from(image: ImageHandle) -> Self {
        Arg::Image(image)
    }
}

impl From<Image> for Arg {
    fn from(image: Image) -> Self {
        Arg::Image(Arc::new(image))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Param(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Param(Value::from(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Param(Value::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Param(Value::from(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Param(Value::from(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Param(Value::from(value))
    }
}

/// Arguments of one call, keyword order preserved.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: Vec<Arg>,
    kwargs: Vec<(String, Arg)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a keyword argument
    pub fn kw(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.set(name, arg);
        self
    }

    /// Add a positional argument. Tracked calls reject these.
    pub fn positional(mut self, arg: impl Into<Arg>) -> Self {
        self.positional.push(arg.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, arg: impl Into<Arg>) {
        let name = name.into();
        let arg = arg.into();
        match self.kwargs.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = arg,
            None => self.kwargs.push((name, arg)),
        }
    }

    pub fn positional_args(&self) -> &[Arg] {
        &self.positional
    }

    pub fn kwargs(&self) -> impl Iterator<Item = (&str, &Arg)> {
        self.kwargs.iter().map(|(name, arg)| (name.as_str(), arg))
    }

    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, arg)| arg)
    }

    /// Get a required image argument
    pub fn image(&self, name: &str) -> anyhow::Result<&ImageHandle> {
        match self.get(name) {
            Some(Arg::Image(image)) => Ok(image),
            Some(other) => Err(anyhow!(
                "Argument '{}' must be an image, got {}",
                name,
                other.kind()
            )),
            None => Err(anyhow!("Argument '{}' not found", name)),
        }
    }

    /// Get an optional image argument; an explicit null counts as absent
    pub fn image_opt(&self, name: &str) -> anyhow::Result<Option<&ImageHandle>> {
        match self.get(name) {
            None | Some(Arg::Param(Value::Null)) => Ok(None),
            Some(_) => self.image(name).map(Some),
        }
    }

    /// Get a required plain parameter
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        match self.get(name) {
            Some(Arg::Param(value)) => serde_json::from_value(value.clone())
                .map_err(|e| anyhow!("Failed to deserialize argument '{}': {}", name, e)),
            Some(Arg::Image(_)) => Err(anyhow!("Argument '{}' is an image, not a parameter", name)),
            None => Err(anyhow!("Argument '{}' not found", name)),
        }
    }

    /// Get an optional plain parameter
    pub fn param_opt<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.get(name) {
            None | Some(Arg::Param(Value::Null)) => Ok(None),
            Some(_) => self.param(name).map(Some),
        }
    }
}

/// What a tracked function hands back to its caller.
#[derive(Debug, Clone)]
pub enum Returned {
    Nothing,
    Single(Arg),
    Tuple(Vec<Arg>),
}

impl Returned {
    pub fn image(image: impl Into<Arg>) -> Self {
        Returned::Single(image.into())
    }

    pub fn images<I, A>(images: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Returned::Tuple(images.into_iter().map(Into::into).collect())
    }

    /// The single returned image, if that is what was returned
    pub fn as_image(&self) -> Option<&ImageHandle> {
        match self {
            Returned::Single(arg) => arg.as_image(),
            _ => None,
        }
    }

    /// Every returned image in order; plain values are skipped
    pub fn image_list(&self) -> Vec<&ImageHandle> {
        match self {
            Returned::Nothing => Vec::new(),
            Returned::Single(arg) => arg.as_image().into_iter().collect(),
            Returned::Tuple(args) => args.iter().filter_map(Arg::as_image).collect(),
        }
    }
}
