//! Buffer combiner
//!
//! Stateless elementwise plumbing between the tracer stages. Each operation
//! runs on the dispatcher's kernel backend and counts as one dispatch of the
//! matching kernel.

use crate::dispatch::{kernel_names, Dispatcher, KernelLibrary};
use crate::error::BakeResult;
use crate::volume::TexelVolume;

/// Elementwise combination kernels
pub struct BufferCombiner<'a> {
    dispatcher: &'a Dispatcher<'a>,
    library: &'a KernelLibrary,
}

impl<'a> BufferCombiner<'a> {
    /// Combiner over a dispatcher
    pub fn new(dispatcher: &'a Dispatcher<'a>, library: &'a KernelLibrary) -> Self {
        Self { dispatcher, library }
    }

    /// `rgb = a.rgb + b.rgb`, `alpha = max(a.a, b.a)`
    pub fn add(&self, a: &TexelVolume, b: &TexelVolume) -> BakeResult<TexelVolume> {
        let kernel = self.library.require(kernel_names::ADD)?;
        let out = self.dispatcher.kernels().add(a, b)?;
        self.dispatcher.record(kernel)?;
        Ok(out)
    }

    /// `rgb = albedo.rgb * boost * light.rgb`, `alpha = albedo.a`
    pub fn combine_albedo_with_light(
        &self,
        albedo: &TexelVolume,
        light: &TexelVolume,
        boost: f32,
    ) -> BakeResult<TexelVolume> {
        let kernel = self.library.require(kernel_names::COMBINE_ALBEDO_LIGHT)?;
        let out = self.dispatcher.kernels().combine_albedo_with_light(albedo, light, boost)?;
        self.dispatcher.record(kernel)?;
        Ok(out)
    }

    /// `rgb = a.rgb * s`, alpha unchanged
    pub fn scale(&self, a: &TexelVolume, s: f32) -> BakeResult<TexelVolume> {
        let kernel = self.library.require(kernel_names::SCALE)?;
        let out = self.dispatcher.kernels().scale(a, s)?;
        self.dispatcher.record(kernel)?;
        Ok(out)
    }

    /// Sum of any number of light buffers
    pub fn sum(&self, first: &TexelVolume, rest: &[&TexelVolume]) -> BakeResult<TexelVolume> {
        let mut acc = first.clone();
        for b in rest {
            acc = self.add(&acc, b)?;
        }
        Ok(acc)
    }

    /// Reflected light plus emission:
    /// `albedo * boost * light + emissive * emissive_intensity`
    pub fn shade(
        &self,
        albedo: &TexelVolume,
        light: &TexelVolume,
        boost: f32,
        emissive: &TexelVolume,
        emissive_intensity: f32,
    ) -> BakeResult<TexelVolume> {
        let reflected = self.combine_albedo_with_light(albedo, light, boost)?;
        let emitted = if emissive_intensity == 1.0 {
            emissive.clone()
        } else {
            self.scale(emissive, emissive_intensity)?
        };
        self.add(&reflected, &emitted)
    }
}
