//! In-memory element tree implementing [`LiveTree`].
//!
//! Every element can sit in a logical and a visual child list at the same
//! time. Mutations publish their change on the scene's [`ChangeHub`] before
//! returning, so observers see changes in emission order.

use std::collections::HashMap;
use std::time::Duration;

use crate::live::{Change, ChangeHub, ElementId, ElementInfo, LiveTree, Topic, TreeKind};
use crate::timing::{LayoutPass, Timings};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Element {
    type_name: String,
    name: Option<String>,
    classes: Option<Vec<String>>,
    logical_parent: Option<ElementId>,
    visual_parent: Option<ElementId>,
    logical_children: Vec<ElementId>,
    visual_children: Vec<ElementId>,
    /// Own cost of one measure/arrange of this element.
    layout_cost: Duration,
}

impl Element {
    fn new(type_name: &str, taggable: bool) -> Self {
        Self {
            type_name: type_name.to_string(),
            name: None,
            classes: taggable.then(Vec::new),
            logical_parent: None,
            visual_parent: None,
            logical_children: Vec::new(),
            visual_children: Vec::new(),
            layout_cost: Duration::ZERO,
        }
    }

    fn children(&self, kind: TreeKind) -> &[ElementId] {
        match kind {
            TreeKind::Logical => &self.logical_children,
            TreeKind::Visual => &self.visual_children,
        }
    }

    fn children_mut(&mut self, kind: TreeKind) -> &mut Vec<ElementId> {
        match kind {
            TreeKind::Logical => &mut self.logical_children,
            TreeKind::Visual => &mut self.visual_children,
        }
    }

    fn parent_of(&self, kind: TreeKind) -> Option<ElementId> {
        match kind {
            TreeKind::Logical => self.logical_parent,
            TreeKind::Visual => self.visual_parent,
        }
    }

    fn parent_mut(&mut self, kind: TreeKind) -> &mut Option<ElementId> {
        match kind {
            TreeKind::Logical => &mut self.logical_parent,
            TreeKind::Visual => &mut self.visual_parent,
        }
    }
}

/// Mutable element tree with a change feed and a simulated layout pass.
#[derive(Debug)]
pub struct Scene {
    elements: Vec<Element>,
    root: ElementId,
    hub: ChangeHub,
    profile: Option<HashMap<ElementId, Duration>>,
    passes: u64,
}

impl Scene {
    /// Create a scene whose root is a control of type `root_type`.
    pub fn new(root_type: &str) -> Self {
        Self {
            elements: vec![Element::new(root_type, true)],
            root: ElementId(0),
            hub: ChangeHub::new(),
            profile: None,
            passes: 0,
        }
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of layout passes executed so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Create a detached control (taggable element).
    pub fn create_control(&mut self, type_name: &str) -> ElementId {
        self.push_element(Element::new(type_name, true))
    }

    /// Create a detached plain visual without classes.
    pub fn create_visual(&mut self, type_name: &str) -> ElementId {
        self.push_element(Element::new(type_name, false))
    }

    fn push_element(&mut self, element: Element) -> ElementId {
        let id = ElementId(self.elements.len() as u32);
        self.elements.push(element);
        id
    }

    fn get(&self, id: ElementId) -> Result<&Element> {
        self.elements
            .get(id.0 as usize)
            .ok_or(Error::UnknownElement(id))
    }

    fn get_mut(&mut self, id: ElementId) -> Result<&mut Element> {
        self.elements
            .get_mut(id.0 as usize)
            .ok_or(Error::UnknownElement(id))
    }

    pub fn set_name(&mut self, id: ElementId, name: &str) -> Result<()> {
        let element = self.get_mut(id)?;
        element.name = (!name.is_empty()).then(|| name.to_string());
        Ok(())
    }

    pub fn set_layout_cost(&mut self, id: ElementId, cost: Duration) -> Result<()> {
        self.get_mut(id)?.layout_cost = cost;
        Ok(())
    }

    pub fn classes(&self, id: ElementId) -> Result<&[String]> {
        self.get(id)?
            .classes
            .as_deref()
            .ok_or(Error::NotTaggable(id))
    }

    /// Add `class` to a control. Adding a class it already has is a no-op.
    pub fn add_class(&mut self, id: ElementId, class: &str) -> Result<()> {
        let classes = self
            .get_mut(id)?
            .classes
            .as_mut()
            .ok_or(Error::NotTaggable(id))?;

        if classes.iter().any(|c| c == class) {
            return Ok(());
        }
        classes.push(class.to_string());
        self.hub.publish(id, Topic::Element, Change::ClassesChanged);
        Ok(())
    }

    pub fn remove_class(&mut self, id: ElementId, class: &str) -> Result<()> {
        let classes = self
            .get_mut(id)?
            .classes
            .as_mut()
            .ok_or(Error::NotTaggable(id))?;

        let before = classes.len();
        classes.retain(|c| c != class);
        if classes.len() != before {
            self.hub.publish(id, Topic::Element, Change::ClassesChanged);
        }
        Ok(())
    }

    /// Add the class if missing, remove it otherwise.
    pub fn toggle_class(&mut self, id: ElementId, class: &str) -> Result<()> {
        if self.classes(id)?.iter().any(|c| c == class) {
            self.remove_class(id, class)
        } else {
            self.add_class(id, class)
        }
    }

    /// Insert `child` into the `kind` child list of `parent` at `index`.
    pub fn insert_child(
        &mut self,
        parent: ElementId,
        kind: TreeKind,
        index: usize,
        child: ElementId,
    ) -> Result<()> {
        if self.get(child)?.parent_of(kind).is_some() || child == self.root {
            return Err(Error::AlreadyParented(child));
        }
        // refuse cycles: `child` must not be `parent` or one of its ancestors
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(Error::AlreadyParented(child));
            }
            cursor = self.get(current)?.parent_of(kind);
        }

        let len = self.get(parent)?.children(kind).len();
        if index > len {
            return Err(Error::IndexOutOfRange { index, len });
        }

        self.get_mut(parent)?.children_mut(kind).insert(index, child);
        *self.get_mut(child)?.parent_mut(kind) = Some(parent);
        self.hub.publish(
            parent,
            Topic::Children(kind),
            Change::Insert {
                index,
                element: child,
            },
        );
        Ok(())
    }

    /// Append `child` to the `kind` child list of `parent`.
    pub fn push_child(&mut self, parent: ElementId, kind: TreeKind, child: ElementId) -> Result<()> {
        let index = self.get(parent)?.children(kind).len();
        self.insert_child(parent, kind, index, child)
    }

    /// Remove and return the child at `index`.
    ///
    /// Removing from the logical tree detaches the whole logical subtree.
    pub fn remove_child(&mut self, parent: ElementId, kind: TreeKind, index: usize) -> Result<ElementId> {
        let len = self.get(parent)?.children(kind).len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }

        let child = self.get_mut(parent)?.children_mut(kind).remove(index);
        *self.get_mut(child)?.parent_mut(kind) = None;
        self.hub
            .publish(parent, Topic::Children(kind), Change::Remove { index });

        if kind == TreeKind::Logical {
            self.publish_detached(child);
        }
        Ok(child)
    }

    /// Remove every child of `parent` in one `Reset` change.
    pub fn clear_children(&mut self, parent: ElementId, kind: TreeKind) -> Result<()> {
        let removed = std::mem::take(self.get_mut(parent)?.children_mut(kind));
        for child in &removed {
            *self.get_mut(*child)?.parent_mut(kind) = None;
        }
        self.hub.publish(parent, Topic::Children(kind), Change::Reset);

        if kind == TreeKind::Logical {
            for child in removed {
                self.publish_detached(child);
            }
        }
        Ok(())
    }

    /// Swap the whole child list: one `Reset` followed by one `Insert` per
    /// new child.
    pub fn replace_children(
        &mut self,
        parent: ElementId,
        kind: TreeKind,
        children: &[ElementId],
    ) -> Result<()> {
        self.clear_children(parent, kind)?;
        for child in children {
            self.push_child(parent, kind, *child)?;
        }
        Ok(())
    }

    fn publish_detached(&self, element: ElementId) {
        let mut stack = vec![element];
        while let Some(next) = stack.pop() {
            self.hub.publish(next, Topic::Element, Change::Detached);
            stack.extend_from_slice(self.children(next, TreeKind::Logical));
        }
    }

    fn measure(&self, element: ElementId, profile: &mut Option<HashMap<ElementId, Duration>>) -> Duration {
        let Ok(data) = self.get(element) else {
            return Duration::ZERO;
        };

        let mut total = data.layout_cost;
        for child in &data.visual_children {
            total += self.measure(*child, profile);
        }

        if let Some(profile) = profile.as_mut() {
            profile.insert(element, total);
        }
        total
    }

    /// Small window used by the binaries: a logical composition of controls
    /// plus the template visuals a toolkit would generate for them.
    pub fn demo() -> Self {
        let mut scene = Scene::new("Window");
        let root = scene.root();
        if let Err(err) = scene.build_demo(root) {
            tracing::warn!("Demo scene incomplete: {}", err);
        }
        scene
    }

    fn build_demo(&mut self, root: ElementId) -> Result<()> {
        self.set_name(root, "MainWindow")?;
        self.set_layout_cost(root, Duration::from_micros(120))?;

        let border = self.create_visual("Border");
        let presenter = self.create_control("ContentPresenter");
        let panel = self.create_control("StackPanel");
        self.set_name(panel, "Root")?;
        self.add_class(panel, "main")?;

        self.push_child(root, TreeKind::Visual, border)?;
        self.push_child(border, TreeKind::Visual, presenter)?;
        self.push_child(presenter, TreeKind::Visual, panel)?;
        self.push_child(root, TreeKind::Logical, panel)?;
        self.set_layout_cost(border, Duration::from_micros(40))?;
        self.set_layout_cost(presenter, Duration::from_micros(30))?;
        self.set_layout_cost(panel, Duration::from_micros(200))?;

        for (i, label) in ["Open", "Save", "Close"].iter().enumerate() {
            let button = self.create_control("Button");
            self.set_name(button, &format!("{}Button", label.to_lowercase()))?;
            if i == 0 {
                self.add_class(button, "primary")?;
            }
            let chrome = self.create_visual("ButtonChrome");
            let text = self.create_control("TextBlock");

            self.push_child(panel, TreeKind::Logical, button)?;
            self.push_child(button, TreeKind::Logical, text)?;
            self.push_child(panel, TreeKind::Visual, button)?;
            self.push_child(button, TreeKind::Visual, chrome)?;
            self.push_child(chrome, TreeKind::Visual, text)?;

            self.set_layout_cost(button, Duration::from_micros(150 + 60 * i as u64))?;
            self.set_layout_cost(chrome, Duration::from_micros(25))?;
            self.set_layout_cost(text, Duration::from_micros(300 - 80 * i as u64))?;
        }

        let list = self.create_control("ListBox");
        self.set_name(list, "Files")?;
        self.push_child(panel, TreeKind::Logical, list)?;
        self.push_child(panel, TreeKind::Visual, list)?;
        self.set_layout_cost(list, Duration::from_micros(90))?;
        for i in 0..4 {
            let item = self.create_control("ListBoxItem");
            self.push_child(list, TreeKind::Logical, item)?;
            self.push_child(list, TreeKind::Visual, item)?;
            self.set_layout_cost(item, Duration::from_micros(70 + 15 * i))?;
        }
        Ok(())
    }
}

impl LiveTree for Scene {
    fn describe(&self, element: ElementId) -> Option<ElementInfo> {
        let data = self.get(element).ok()?;
        Some(ElementInfo {
            type_name: data.type_name.clone(),
            name: data.name.clone(),
            classes: data.classes.clone(),
        })
    }

    fn children(&self, element: ElementId, kind: TreeKind) -> &[ElementId] {
        self.get(element)
            .map(|data| data.children(kind))
            .unwrap_or(&[])
    }

    fn parent(&self, element: ElementId, kind: TreeKind) -> Option<ElementId> {
        self.get(element).ok()?.parent_of(kind)
    }

    fn hub(&self) -> &ChangeHub {
        &self.hub
    }
}

impl LayoutPass for Scene {
    fn begin_profiling(&mut self) {
        self.profile = Some(HashMap::new());
    }

    /// Measure the visual tree from the root. Each element's time includes
    /// its visual descendants.
    fn execute_pass(&mut self) {
        let mut profile = self.profile.take();
        let total = self.measure(self.root, &mut profile);
        self.profile = profile;
        self.passes += 1;
        tracing::debug!("Layout pass {} took {:?}", self.passes, total);
    }

    fn end_profiling(&mut self) -> Timings {
        Timings::from(self.profile.take().unwrap_or_default())
    }
}
