/* Copyright © 2018 Gianmarco Garrisi

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>. */

//! This crate implements a discrete-event simulation framework inspired by
//! the SimPy library for Python. It runs on stable Rust: processes are
//! plain `async fn`s, and every yield point is an `.await` on an [`Event`].
//!
//! # Simulation
//! A simulation is performed by scheduling one or more processes that model
//! the system you are simulating. Your model may share some kind of finite
//! resource among processes — a bank teller, a gas pump, a cable with
//! limited bandwidth — via [`Resource`], [`Container`] or [`Store`].
//!
//! After setting up an [`Environment`], it can be driven one event at a
//! time with [`Environment::step`], or run to completion with
//! [`Environment::run`] under some [`RunUntil`] condition. Wrap it in a
//! [`RealtimeEnvironment`] to pace those same steps against the wall clock
//! instead of running as fast as possible.
//!
//! # Process
//! A process is started with [`Environment::process`] from an
//! `async fn(Environment) -> Result<Value, Value>` body. Inside that body,
//! `.await` any [`Event`] — a [`timeout`], another process's completion, a
//! resource request, a composite [`Event::and`]/[`Event::or`] — to suspend
//! until it fires. A process is itself an event: other processes can
//! `.await` its [`Process::event`], and it can be interrupted with
//! [`Process::interrupt`].
//!
//! # Resources
//! [`Resource`], [`PriorityResource`] and [`PreemptiveResource`] model a
//! pool of identical, indivisible slots. [`Container`] models a shared
//! real-valued level (fuel, bandwidth). [`Store`], [`PriorityStore`] and
//! [`FilterStore`] model a bounded collection of discrete items.

mod condition;
mod container;
mod env;
mod error;
mod event;
mod ids;
mod process;
mod realtime;
mod resource;
mod store;
mod value;

pub use container::Container;
pub use env::{Environment, RunUntil};
pub use error::{SimError, SimResult};
pub use event::{timeout, Event};
pub use ids::{ContainerId, EventId, ResourceId, StoreId};
pub use process::{Interrupt, Process};
pub use realtime::RealtimeEnvironment;
pub use resource::{Preempted, PreemptiveResource, PriorityResource, Resource};
pub use store::{FilterStore, PriorityStore, Store};
pub use value::Value;
