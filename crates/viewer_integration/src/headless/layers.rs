use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use anyhow::{anyhow, bail, Result};
use shared::domain::LayerId;

use super::{read, write};
use crate::{
    ImageLayer, LayerProperties, LayerSnapshot, LayerStack, LayerUpdate, SpatialTransform,
    VolLayer,
};

/// Ordered layers, bottom (background) first.
pub struct HeadlessStack {
    layers: RwLock<Vec<VolLayer>>,
}

impl HeadlessStack {
    pub fn new(background: VolLayer) -> Self {
        Self {
            layers: RwLock::new(vec![background]),
        }
    }

    /// Appends `layer` on top; ids must be unique.
    pub fn push(&self, layer: VolLayer) -> Result<()> {
        let mut layers = write(&self.layers);
        if layers.iter().any(|existing| existing.id == layer.id) {
            bail!("layer id '{}' already exists", layer.id);
        }
        layers.push(layer);
        Ok(())
    }

    fn update(&self, id: &LayerId, update: &LayerUpdate) -> Result<()> {
        let mut layers = write(&self.layers);
        let layer = layers
            .iter_mut()
            .find(|layer| &layer.id == id)
            .ok_or_else(|| anyhow!("unknown layer '{id}'"))?;
        layer.properties.apply(update);
        Ok(())
    }

    fn properties(&self, id: &LayerId) -> Option<LayerProperties> {
        read(&self.layers)
            .iter()
            .find(|layer| &layer.id == id)
            .map(|layer| layer.properties.clone())
    }

    fn all_properties(&self) -> HashMap<LayerId, LayerProperties> {
        read(&self.layers)
            .iter()
            .map(|layer| (layer.id.clone(), layer.properties.clone()))
            .collect()
    }

    fn bottom(&self) -> Option<VolLayer> {
        read(&self.layers).first().cloned()
    }
}

impl LayerStack for HeadlessStack {
    fn layer_ids(&self) -> Vec<LayerId> {
        read(&self.layers).iter().map(|l| l.id.clone()).collect()
    }

    fn layer(&self, id: &LayerId) -> Option<LayerSnapshot> {
        read(&self.layers)
            .iter()
            .find(|layer| &layer.id == id)
            .map(|layer| LayerSnapshot {
                id: layer.id.clone(),
                volume: layer.volume.clone(),
                properties: layer.properties.clone(),
            })
    }

    fn move_layer(&self, id: &LayerId, index: usize) -> Result<()> {
        let mut layers = write(&self.layers);
        let from = layers
            .iter()
            .position(|layer| &layer.id == id)
            .ok_or_else(|| anyhow!("unknown layer '{id}'"))?;
        if index >= layers.len() {
            bail!(
                "target index {index} out of range for {} layers",
                layers.len()
            );
        }
        let layer = layers.remove(from);
        layers.insert(index, layer);
        Ok(())
    }

    fn remove_layer(&self, id: &LayerId) -> Result<()> {
        let mut layers = write(&self.layers);
        let position = layers
            .iter()
            .position(|layer| &layer.id == id)
            .ok_or_else(|| anyhow!("unknown layer '{id}'"))?;
        if layers.len() == 1 {
            bail!("cannot remove '{id}': a stack keeps at least one layer");
        }
        layers.remove(position);
        Ok(())
    }
}

/// Composite over a [`HeadlessStack`]. The main instance writes property
/// updates through to the stack; per-view copies keep their own properties.
pub struct HeadlessImageLayer {
    stack: Arc<HeadlessStack>,
    own_properties: Option<RwLock<HashMap<LayerId, LayerProperties>>>,
}

impl HeadlessImageLayer {
    pub fn new(stack: Arc<HeadlessStack>) -> Self {
        Self {
            stack,
            own_properties: None,
        }
    }
}

impl ImageLayer for HeadlessImageLayer {
    fn stack(&self) -> Arc<dyn LayerStack> {
        self.stack.clone()
    }

    fn layer_ids(&self) -> Vec<LayerId> {
        self.stack.layer_ids()
    }

    fn add_vol_layer(&self, layer: VolLayer) -> Result<()> {
        self.stack.push(layer)
    }

    fn update_layer(&self, id: &LayerId, update: &LayerUpdate) -> Result<()> {
        let Some(own) = &self.own_properties else {
            return self.stack.update(id, update);
        };
        let mut own = write(own);
        if !own.contains_key(id) {
            let seeded = self
                .stack
                .properties(id)
                .ok_or_else(|| anyhow!("unknown layer '{id}'"))?;
            own.insert(id.clone(), seeded);
        }
        if let Some(properties) = own.get_mut(id) {
            properties.apply(update);
        }
        Ok(())
    }

    fn layer_properties(&self, id: &LayerId) -> Option<LayerProperties> {
        if let Some(own) = &self.own_properties {
            if let Some(properties) = read(own).get(id) {
                return Some(properties.clone());
            }
        }
        self.stack.properties(id)
    }

    fn reference_space(&self) -> Option<Arc<dyn SpatialTransform>> {
        self.stack.bottom().map(|layer| layer.volume.space())
    }

    fn reference_dim(&self) -> Option<[usize; 3]> {
        self.stack.bottom().map(|layer| layer.volume.dim())
    }

    fn view_copy(&self) -> Arc<dyn ImageLayer> {
        Arc::new(HeadlessImageLayer {
            stack: self.stack.clone(),
            own_properties: Some(RwLock::new(self.stack.all_properties())),
        })
    }
}
