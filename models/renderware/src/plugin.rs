use std::{
	any::Any,
	fmt,
	io::Write,
	marker::PhantomData
};

use crate::{
	chunk::{
		find_chunk,
		read_children,
		ChunkHeader,
		Source,
		ID_EXTENSION
	},
	engine::Engine,
	error::RwError
};

/// Side data a plugin attaches to a host object
pub trait Extension: Any + fmt::Debug {
	fn clone_box(&self) -> Box<dyn Extension>;
	fn eq_box(&self, other: &dyn Extension) -> bool;
	fn as_any(&self) -> &dyn Any;
	fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> Extension for T
where
	T: Any + Clone + fmt::Debug + PartialEq,
{
	fn clone_box(&self) -> Box<dyn Extension> {
		Box::new(self.clone())
	}

	fn eq_box(&self, other: &dyn Extension) -> bool {
		other.as_any().downcast_ref::<T>().map_or(false, |o| o == self)
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

/// Typed key into a host's extension slots, handed out at registration
pub struct PluginHandle<T> {
	slot: usize,
	marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PluginHandle<T> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<T> Copy for PluginHandle<T> {}

impl<T> fmt::Debug for PluginHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PluginHandle({})", self.slot)
	}
}

/// Plugin data owned by one host object. Slots are created by the host's
/// plugin list, so every registered plugin has its default state from the start.
#[derive(Debug, Default)]
pub struct Extensions {
	slots: Vec<Box<dyn Extension>>,
}

impl Extensions {
	pub fn get<T>(&self, handle: PluginHandle<T>) -> Option<&T>
	where
		T: Extension,
	{
		let slot = self.slots.get(handle.slot)?;
		(**slot).as_any().downcast_ref::<T>()
	}

	pub fn get_mut<T>(&mut self, handle: PluginHandle<T>) -> Option<&mut T>
	where
		T: Extension,
	{
		let slot = self.slots.get_mut(handle.slot)?;
		(**slot).as_any_mut().downcast_mut::<T>()
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}
}

impl Clone for Extensions {
	fn clone(&self) -> Self {
		Extensions {
			slots: self.slots.iter().map(|s| (**s).clone_box()).collect(),
		}
	}
}

impl PartialEq for Extensions {
	fn eq(&self, other: &Self) -> bool {
		self.slots.len() == other.slots.len()
			&& self.slots.iter().zip(other.slots.iter()).all(|(a, b)| (**a).eq_box(&**b))
	}
}

/// Serialization hooks of a plugin for host type `H`
pub trait PluginStream<H> {
	fn read(&self, buf: &mut dyn Source, header: &ChunkHeader, host: &mut H, engine: &Engine) -> Result<(), RwError>;

	fn write(&self, buf: &mut Vec<u8>, host: &H, engine: &Engine) -> Result<(), RwError>;

	/// Body size `write` will produce, or `None` if nothing is written
	fn size(&self, host: &H, engine: &Engine) -> Option<u32>;
}

pub type RightsFn<H> = fn(host: &mut H, data: u32, engine: &Engine);

fn construct_default<T>() -> Box<dyn Extension>
where
	T: Extension + Default,
{
	Box::new(T::default())
}

struct PluginEntry<H> {
	id: u32,
	construct: Option<fn() -> Box<dyn Extension>>,
	stream: Option<Box<dyn PluginStream<H>>>,
	rights: Option<RightsFn<H>>,
}

/// Registered plugins of one host type, in registration order
pub struct PluginList<H> {
	entries: Vec<PluginEntry<H>>,
	num_slots: usize,
}

impl<H> Default for PluginList<H> {
	fn default() -> Self {
		PluginList {
			entries: vec![],
			num_slots: 0,
		}
	}
}

impl<H> PluginList<H> {
	pub fn new() -> PluginList<H> {
		PluginList::default()
	}

	/// Registers a plugin carrying data of type `T`. Slots are assigned in
	/// registration order and never reused.
	pub fn register<T>(&mut self, id: u32) -> PluginHandle<T>
	where
		T: Extension + Default,
	{
		let slot = self.num_slots;
		self.num_slots += 1;
		self.entries.push(PluginEntry {
			id: id,
			construct: Some(construct_default::<T>),
			stream: None,
			rights: None,
		});

		PluginHandle {
			slot: slot,
			marker: PhantomData,
		}
	}

	/// Attaches stream hooks to the plugin `id`, registering a data-less
	/// plugin if there is none yet
	pub fn register_stream(&mut self, id: u32, stream: Box<dyn PluginStream<H>>) {
		match self.entries.iter_mut().find(|e| e.id == id && e.stream.is_none()) {
			Some(entry) => entry.stream = Some(stream),
			None => self.entries.push(PluginEntry {
				id: id,
				construct: None,
				stream: Some(stream),
				rights: None,
			}),
		}
	}

	pub fn set_rights_callback(&mut self, id: u32, rights: RightsFn<H>) {
		match self.entries.iter_mut().find(|e| e.id == id) {
			Some(entry) => entry.rights = Some(rights),
			None => self.entries.push(PluginEntry {
				id: id,
				construct: None,
				stream: None,
				rights: Some(rights),
			}),
		}
	}

	pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
		self.entries.iter().map(|e| e.id)
	}

	/// Default extension state for a freshly created host
	pub fn construct(&self) -> Extensions {
		Extensions {
			slots: self.entries.iter().filter_map(|e| e.construct.map(|c| c())).collect(),
		}
	}

	/// Reads the host's Extension chunk, dispatching each sub-chunk to the
	/// first plugin with a stream registered for its id
	pub fn read_extension(&self, buf: &mut dyn Source, host: &mut H, engine: &Engine) -> Result<(), RwError> {
		let header = find_chunk(buf, ID_EXTENSION)?;
		read_children(buf, &header, |buf, sub| {
			let stream = self.entries.iter()
				.filter(|e| e.id == sub.kind)
				.find_map(|e| e.stream.as_ref());

			match stream {
				Some(stream) => stream.read(buf, sub, host, engine),
				None => {
					log::trace!("Skipping unknown plugin {:#X} ({} bytes)", sub.kind, sub.length);
					Ok(())
				},
			}
		})
	}

	/// Size of the Extension body
	pub fn extension_size(&self, host: &H, engine: &Engine) -> u32 {
		self.entries.iter()
			.filter_map(|e| e.stream.as_ref())
			.filter_map(|s| s.size(host, engine))
			.map(|size| ChunkHeader::SIZE + size)
			.sum()
	}

	pub fn write_extension<W>(&self, buf: &mut W, host: &H, engine: &Engine) -> Result<(), RwError>
	where
		W: Write + ?Sized,
	{
		let config = &engine.config;
		ChunkHeader::new(ID_EXTENSION, self.extension_size(host, engine), config).write(buf)?;

		for entry in self.entries.iter() {
			let stream = match entry.stream.as_ref() {
				Some(stream) => stream,
				None => continue,
			};
			let size = match stream.size(host, engine) {
				Some(size) => size,
				None => continue,
			};

			let mut scratch = Vec::with_capacity(size as usize);
			stream.write(&mut scratch, host, engine)?;
			assert_eq!(size as usize, scratch.len(), "plugin {:#X} wrote a different size than it reported",
				entry.id);

			ChunkHeader::new(entry.id, size, config).write(buf)?;
			buf.write_all(&scratch)?;
		}

		Ok(())
	}

	/// Calls the rights callback of the plugin `id`, if it has one
	pub fn assert_rights(&self, host: &mut H, id: u32, data: u32, engine: &Engine) {
		if let Some(rights) = self.entries.iter().find(|e| e.id == id).and_then(|e| e.rights) {
			rights(host, data, engine);
		}
	}
}
