use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::doc::dependency::{DependentAction, describe_paths};
use crate::doc::error::DocError;
use crate::markup::skeleton::Skeleton;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element_type: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    xpath: Option<String>,
    #[serde(default)]
    paths: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    effect: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawScreen {
    #[serde(default)]
    skeleton: String,
    #[serde(default)]
    elements: Map<String, Value>,
}

/// A named element on one screen of the application.
#[derive(Debug, Clone)]
pub struct ApiElement {
    pub screen: String,
    pub name: String,
    pub element: Option<String>,
    pub element_type: Option<String>,
    pub description: String,
    pub path: Option<String>,
    pub state_tag: Option<String>,
    pub effect: Option<String>,
    pub raw_paths: Vec<Vec<String>>,
    pub dependencies: Vec<Vec<DependentAction>>,
}

impl ApiElement {
    /// Symbolic name used in scripts: `<screen>__<element>`.
    pub fn full_name(&self) -> String {
        format!("{}__{}", self.screen, self.name)
    }

    pub fn dependency_description(&self) -> String {
        describe_paths(&self.raw_paths)
    }

    fn to_raw(&self) -> RawElement {
        RawElement {
            api_name: Some(self.full_name()),
            element: self.element.clone(),
            element_type: self.element_type.clone(),
            description: self.description.clone(),
            xpath: self.path.clone(),
            paths: self.raw_paths.clone(),
            state_tag: self.state_tag.clone(),
            effect: self.effect.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiScreen {
    pub name: String,
    pub skeleton_source: String,
    pub skeleton: Skeleton,
    pub fingerprint: String,
    pub elements: Vec<ApiElement>,
}

/// Per-application catalog: screen name -> element name -> selector path and
/// recorded dependency paths. Screen order is the order of the source file;
/// the first screen is the main screen.
#[derive(Debug, Clone, Default)]
pub struct ApiDocument {
    screens: Vec<ApiScreen>,
}

impl ApiDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DocError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let doc = Self::from_json_str(&content)?;
        info!(path = %path.display(), screens = doc.screens.len(), "loaded API document");
        Ok(doc)
    }

    pub fn from_json_str(content: &str) -> Result<Self, DocError> {
        let raw: Map<String, Value> = serde_json::from_str(content).map_err(|e| DocError::Json {
            context: "API document".into(),
            source: e,
        })?;
        Self::from_map(raw)
    }

    fn from_map(raw: Map<String, Value>) -> Result<Self, DocError> {
        let mut screens = Vec::with_capacity(raw.len());
        for (screen_name, screen_value) in raw {
            let screen: RawScreen = serde_json::from_value(screen_value).map_err(|e| DocError::Json {
                context: format!("screen '{}'", screen_name),
                source: e,
            })?;
            let skeleton = if screen.skeleton.trim().is_empty() {
                Skeleton::empty()
            } else {
                Skeleton::parse(&screen.skeleton).map_err(|e| DocError::Skeleton {
                    screen: screen_name.clone(),
                    source: e,
                })?
            };

            let mut elements = Vec::with_capacity(screen.elements.len());
            for (key, value) in screen.elements {
                let raw_element: RawElement = serde_json::from_value(value).map_err(|e| DocError::Json {
                    context: format!("element '{}' on screen '{}'", key, screen_name),
                    source: e,
                })?;
                elements.push(build_element(&screen_name, &key, raw_element)?);
            }

            screens.push(ApiScreen {
                fingerprint: skeleton.fingerprint(),
                name: screen_name,
                skeleton_source: screen.skeleton,
                skeleton,
                elements,
            });
        }
        Ok(Self { screens })
    }

    pub fn screens(&self) -> &[ApiScreen] {
        &self.screens
    }

    pub fn main_screen(&self) -> Option<&str> {
        self.screens.first().map(|s| s.name.as_str())
    }

    pub fn screen(&self, name: &str) -> Option<&ApiScreen> {
        self.screens.iter().find(|s| s.name == name)
    }

    pub fn element(&self, screen: &str, element: &str) -> Option<&ApiElement> {
        let screen = self.screen(screen)?;
        let bare = strip_screen_prefix(&screen.name, element);
        screen.elements.iter().find(|e| e.name == bare)
    }

    pub fn resolve(&self, screen: &str, element: &str) -> Option<&str> {
        self.element(screen, element)?.path.as_deref()
    }

    /// Element for a script symbol. Full `<screen>__<element>` names are
    /// preferred; a bare element name is accepted when it is unique.
    pub fn lookup(&self, symbol: &str) -> Option<&ApiElement> {
        let symbol = symbol.trim_start_matches('$');
        for screen in &self.screens {
            if let Some(rest) = symbol.strip_prefix(&format!("{}__", screen.name)) {
                if let Some(e) = screen.elements.iter().find(|e| e.name == rest) {
                    return Some(e);
                }
            }
        }
        let mut bare = self
            .screens
            .iter()
            .flat_map(|s| s.elements.iter())
            .filter(|e| e.name == symbol);
        match (bare.next(), bare.next()) {
            (Some(e), None) => Some(e),
            _ => None,
        }
    }

    /// Selector path of a script symbol; elements without a path are not addressable.
    pub fn path_of(&self, symbol: &str) -> Option<&str> {
        self.lookup(symbol)?.path.as_deref()
    }

    /// Every addressable element as `(full name, path)`, in document order.
    pub fn symbols(&self) -> Vec<(String, &str)> {
        self.screens
            .iter()
            .flat_map(|s| s.elements.iter())
            .filter_map(|e| e.path.as_deref().map(|p| (e.full_name(), p)))
            .collect()
    }

    /// Screen whose stored skeleton shares the most structure with `live`.
    ///
    /// An exact fingerprint match wins outright; otherwise the largest common
    /// sub-skeleton wins with ties going to the earlier screen. Falls back to
    /// the main screen.
    pub fn screen_for_skeleton(&self, live: &Skeleton) -> Option<&str> {
        let fingerprint = live.fingerprint();
        if let Some(exact) = self.screens.iter().find(|s| s.fingerprint == fingerprint) {
            return Some(&exact.name);
        }
        let mut best: Option<(&str, usize)> = None;
        for screen in &self.screens {
            let count = screen.skeleton.common(live).count();
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((&screen.name, count));
            }
        }
        match best {
            Some((name, count)) if count > 0 => Some(name),
            _ => self.main_screen(),
        }
    }

    /// Candidate dependency paths for `symbol`, most specific first.
    ///
    /// Entries for the same element name on the screen that best matches the
    /// live skeleton come first, then the symbol's own entry, then entries on
    /// other screens in document order. Paths longer than `max_depth` are
    /// dropped and at most `max_paths` are returned.
    pub fn dependency_paths(
        &self,
        live: &Skeleton,
        symbol: &str,
        max_paths: usize,
        max_depth: usize,
    ) -> Vec<&[DependentAction]> {
        let Some(target) = self.lookup(symbol) else {
            return Vec::new();
        };
        let mut entries: Vec<&ApiElement> = Vec::new();
        if let Some(best) = self.screen_for_skeleton(live).and_then(|s| self.screen(s)) {
            entries.extend(best.elements.iter().filter(|e| e.name == target.name));
        }
        entries.push(target);
        entries.extend(
            self.screens
                .iter()
                .flat_map(|s| s.elements.iter())
                .filter(|e| e.name == target.name),
        );

        let mut seen: Vec<(&str, &str)> = Vec::new();
        let mut out: Vec<&[DependentAction]> = Vec::new();
        for entry in entries {
            let key = (entry.screen.as_str(), entry.name.as_str());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            for path in &entry.dependencies {
                if path.is_empty() || path.len() > max_depth {
                    debug!(symbol, steps = path.len(), "skipping dependency path");
                    continue;
                }
                if out.len() == max_paths {
                    return out;
                }
                out.push(path.as_slice());
            }
        }
        out
    }

    /// Replace an element's selector path after a confirmed repair.
    pub fn set_path(&mut self, screen: &str, element: &str, path: &str) -> Result<(), DocError> {
        let unknown = || DocError::UnknownElement {
            screen: screen.to_string(),
            element: element.to_string(),
        };
        let entry = self
            .screens
            .iter_mut()
            .find(|s| s.name == screen)
            .ok_or_else(unknown)?;
        let bare = strip_screen_prefix(screen, element).to_string();
        let target = entry
            .elements
            .iter_mut()
            .find(|e| e.name == bare)
            .ok_or_else(unknown)?;
        info!(screen, element = %bare, path, "updated element path");
        target.path = Some(normalize_path(path));
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for screen in &self.screens {
            let mut elements = Map::new();
            for element in &screen.elements {
                let raw = serde_json::to_value(element.to_raw()).unwrap_or(Value::Null);
                elements.insert(element.name.clone(), raw);
            }
            let mut entry = Map::new();
            entry.insert("skeleton".into(), Value::String(screen.skeleton_source.clone()));
            entry.insert("elements".into(), Value::Object(elements));
            out.insert(screen.name.clone(), Value::Object(entry));
        }
        Value::Object(out)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DocError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.to_json()).map_err(|e| DocError::Json {
            context: "serialize API document".into(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| DocError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }
}

fn build_element(screen: &str, key: &str, raw: RawElement) -> Result<ApiElement, DocError> {
    if let Some(api_name) = &raw.api_name {
        if !api_name.contains("__") && !api_name.contains(':') {
            return Err(DocError::MalformedApiName {
                name: api_name.clone(),
                reason: "expected '<screen>__<element>'".into(),
            });
        }
    }
    let name = strip_screen_prefix(screen, key).to_string();
    if name.is_empty() {
        return Err(DocError::MalformedApiName {
            name: key.to_string(),
            reason: "empty element name".into(),
        });
    }

    let dependencies = raw
        .paths
        .iter()
        .map(|path| {
            path.iter()
                .filter(|step| !step.trim().is_empty())
                .map(|step| DependentAction::parse(step))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ApiElement {
        screen: screen.to_string(),
        name,
        element: raw.element,
        element_type: raw.element_type,
        description: raw.description,
        path: raw.xpath.as_deref().map(normalize_path),
        state_tag: raw.state_tag,
        effect: raw.effect,
        raw_paths: raw.paths,
        dependencies,
    })
}

fn strip_screen_prefix<'a>(screen: &str, key: &'a str) -> &'a str {
    let key = key.trim().trim_start_matches('$');
    key.strip_prefix(screen)
        .and_then(|rest| rest.strip_prefix("__").or_else(|| rest.strip_prefix(':')))
        .unwrap_or(key)
}

/// Recorded paths sometimes spell the attribute `resource-id`.
fn normalize_path(path: &str) -> String {
    path.trim().replace("resource-id", "resource_id")
}
