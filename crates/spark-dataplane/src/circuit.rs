//! # circuit 模块说明
//!
//! ## 角色定位（Why）
//! - 电路是一条连接在运行时的化身：按连接元数据为每个 rank 建立端口存储，
//!   持有传输模板，并驱动推模式的逐消息拷贝或拉模式的轮询搬运；
//! - 分发策略不再持有指回电路的引用，电路拥有元数据并在调用时显式传递上下文。
//!
//! ## 契约（What）
//! - 建连失败时已完成的分配全部归还，不留下半可用的电路；
//! - 一次传输在确认全部目标都可写之前不拷贝任何字节；任一目标仍满则返回
//!   [`TransferOutcome::Blocked`]，待提交的输出保持不变，可稍后重试；
//! - 消息超过目标容量返回 [`DataplaneError::MessageTooLarge`]，绝不截断；
//! - 传输调用需由调用方串行化（`&mut self` 已在类型层面保证）。
//!
//! ## 执行逻辑（How）
//! - 推模式：[`Circuit::advance_output`] 查模板第 `sequence` 步，校验生产者轮次，
//!   两遍遍历目标（检查 → 拷贝 + 写元数据 + 置满）；
//! - 拉模式：[`Circuit::publish`] 只在生产者自己的缓冲上写元数据并置满，
//!   消费端的 [`Circuit::poll_input`] 通过 [`FlagPollDriver`] 检查、拉取并释放生产者缓冲。

use std::sync::Arc;

use crate::{
    config::DataplaneConfig,
    descriptor::{DescriptorKind, Descriptors, FlowRole},
    endpoint::EndpointRegistry,
    error::{DataplaneError, Result},
    meta::BufferMetaData,
    metadata::{ConnectionMetaData, FlowControl, PortSetMetaData},
    port::{InputPort, OutputPort, PortBuffers},
    pull::{FlagPollDriver, PollBudget, PullDataDriver, PullDataInfo, PullStatus},
    template::TransferTemplate,
    tx::TxHandler,
};

/// 下一条消息应当由哪个生产 rank 的哪个缓冲提交。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SourceSlot {
    pub rank: u32,
    pub buffer: u32,
}

/// 单次提交的结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferOutcome {
    /// 消息已写入全部目标并置满。
    Delivered { sequence: u64, targets: usize },
    /// 某个目标缓冲尚未被消费，未拷贝任何字节。
    Blocked {
        port_set: u32,
        rank: u32,
        target_buffer: u32,
    },
    /// 拉模式下生产者当前缓冲尚未被消费者释放。
    Busy { rank: u32, buffer: u32 },
}

/// 运行时连接。
pub struct Circuit {
    id: String,
    metadata: ConnectionMetaData,
    config: DataplaneConfig,
    tx: TxHandler,
    template: Option<Arc<TransferTemplate>>,
    outputs: Vec<OutputPort>,
    inputs: Vec<Vec<InputPort>>,
    puller: Option<FlagPollDriver>,
    pulled: u64,
    sequence: u64,
    scratch: Vec<u8>,
}

fn consumer_role(flow: FlowControl) -> FlowRole {
    match flow {
        FlowControl::Push => FlowRole::ActiveFlowControl,
        FlowControl::Pull => FlowRole::ActiveMessage,
    }
}

/// 为一个消费 port-set 建立全部输入端口。
fn build_inputs(
    ordinal: u32,
    port_set: &PortSetMetaData,
    registry: &EndpointRegistry,
    config: &DataplaneConfig,
    flow: FlowControl,
    template: Option<&TransferTemplate>,
    sequence: u64,
) -> Result<Vec<InputPort>> {
    let mut ports = Vec::with_capacity(port_set.ports().len());
    for port in port_set.ports() {
        let buffers = match port.remote_descriptor() {
            None => {
                let resources = registry.attach(port.endpoint())?;
                PortBuffers::allocate(
                    &resources,
                    DescriptorKind::Consumer,
                    consumer_role(flow),
                    port_set.buffer_count(),
                    port_set.buffer_size(),
                    config,
                )?
            }
            Some(remote) => {
                let handles = remote.handles(port.endpoint().medium());
                let handles = if handles.is_local() {
                    handles
                } else {
                    registry.with_mappings(|table| handles.remap(table))?
                };
                let local = handles.local()?;
                let region = registry.region_at(
                    local.data_buffer_base_addr,
                    u64::from(local.data_buffer_size),
                )?;
                PortBuffers::attach(region, local)?
            }
        };
        let cursor = template
            .and_then(|t| t.first_target(sequence, ordinal, port.rank()))
            .unwrap_or(0);
        ports.push(InputPort::new(ordinal, port.rank(), buffers, cursor));
    }
    Ok(ports)
}

impl Circuit {
    /// 按连接元数据建立电路。
    ///
    /// 拉模式要求单生产 rank、单消费 port-set、单消费 rank，且消费端为本地分配。
    pub fn new(
        id: impl Into<String>,
        metadata: ConnectionMetaData,
        registry: &EndpointRegistry,
        config: &DataplaneConfig,
    ) -> Result<Self> {
        let id = id.into();
        config.validate()?;
        let flow = metadata.flow();
        if flow == FlowControl::Pull {
            let single = metadata.producer().ranks() == 1
                && metadata.consumers().len() == 1
                && metadata.consumers()[0].ranks() == 1;
            if !single {
                return Err(DataplaneError::topology(
                    "pull connections carry exactly one producer rank and one consumer rank",
                ));
            }
            if metadata.consumers()[0].ports()[0].remote_descriptor().is_some() {
                return Err(DataplaneError::topology(
                    "pull connections need a locally allocated consumer",
                ));
            }
        }

        let producer = metadata.producer();
        let producer_role = match flow {
            FlowControl::Push => FlowRole::ActiveMessage,
            FlowControl::Pull => FlowRole::Passive,
        };
        let mut outputs = Vec::with_capacity(producer.ports().len());
        for port in producer.ports() {
            let resources = registry.attach(port.endpoint())?;
            let buffers = PortBuffers::allocate(
                &resources,
                DescriptorKind::Producer,
                producer_role,
                producer.buffer_count(),
                producer.buffer_size(),
                config,
            )?;
            outputs.push(OutputPort::new(port.rank(), buffers));
        }

        let mut tx = TxHandler::new(config.template.max_period);
        let template = match flow {
            FlowControl::Push => Some(tx.template_for(&metadata)?),
            FlowControl::Pull => None,
        };

        let mut inputs = Vec::with_capacity(metadata.consumers().len());
        for (ordinal, port_set) in (0u32..).zip(metadata.consumers()) {
            inputs.push(build_inputs(
                ordinal,
                port_set,
                registry,
                config,
                flow,
                template.as_deref(),
                0,
            )?);
        }

        let puller = match flow {
            FlowControl::Push => None,
            FlowControl::Pull => Some(FlagPollDriver::new(producer_pull_info(&outputs)?)),
        };

        tracing::debug!(
            circuit.id = %id,
            circuit.flow = ?flow,
            circuit.producer_ranks = outputs.len(),
            circuit.port_sets = inputs.len(),
            "circuit established"
        );
        Ok(Self {
            id,
            metadata,
            config: config.clone(),
            tx,
            template,
            outputs,
            inputs,
            puller,
            pulled: 0,
            sequence: 0,
            scratch: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &ConnectionMetaData {
        &self.metadata
    }

    /// 追加一个消费 port-set 并重建模板，返回其序号。
    ///
    /// 失败时电路保持原拓扑不变；新端口的游标对齐到模板为其分配的第一个目标缓冲。
    pub fn add_port_set(
        &mut self,
        port_set: PortSetMetaData,
        registry: &EndpointRegistry,
    ) -> Result<u32> {
        if self.metadata.flow() == FlowControl::Pull {
            return Err(DataplaneError::topology(
                "pull connections carry exactly one consumer port-set",
            ));
        }
        let mut next = self.metadata.clone();
        let ordinal = next.add_port_set(port_set)?;
        let template = self.tx.template_for(&next)?;
        let ports = build_inputs(
            ordinal,
            next.consumer(ordinal)?,
            registry,
            &self.config,
            next.flow(),
            Some(template.as_ref()),
            self.sequence,
        )?;
        self.metadata = next;
        self.template = Some(template);
        self.inputs.push(ports);
        tracing::debug!(
            circuit.id = %self.id,
            port_set.ordinal = ordinal,
            template.builds = self.tx.builds(),
            "port-set added"
        );
        Ok(ordinal)
    }

    /// 当前使用的传输模板；拉模式下为 `None`。
    pub fn template(&self) -> Option<&Arc<TransferTemplate>> {
        self.template.as_ref()
    }

    pub fn tx(&self) -> &TxHandler {
        &self.tx
    }

    pub fn output(&self, rank: u32) -> Result<&OutputPort> {
        let count = self.outputs.len() as u32;
        self.outputs
            .get(rank as usize)
            .ok_or_else(|| DataplaneError::index("producer rank", rank, count))
    }

    pub fn output_mut(&mut self, rank: u32) -> Result<&mut OutputPort> {
        let count = self.outputs.len() as u32;
        self.outputs
            .get_mut(rank as usize)
            .ok_or_else(|| DataplaneError::index("producer rank", rank, count))
    }

    pub fn input(&self, port_set: u32, rank: u32) -> Result<&InputPort> {
        let set = self
            .inputs
            .get(port_set as usize)
            .ok_or_else(|| DataplaneError::index("port-set", port_set, self.inputs.len() as u32))?;
        set.get(rank as usize)
            .ok_or_else(|| DataplaneError::index("consumer rank", rank, set.len() as u32))
    }

    fn input_mut(&mut self, port_set: u32, rank: u32) -> Result<&mut InputPort> {
        let sets = self.inputs.len() as u32;
        let set = self
            .inputs
            .get_mut(port_set as usize)
            .ok_or_else(|| DataplaneError::index("port-set", port_set, sets))?;
        let ranks = set.len() as u32;
        set.get_mut(rank as usize)
            .ok_or_else(|| DataplaneError::index("consumer rank", rank, ranks))
    }

    pub fn producer_descriptor(&self, rank: u32) -> Result<&Descriptors> {
        Ok(self.output(rank)?.descriptor())
    }

    pub fn consumer_descriptor(&self, port_set: u32, rank: u32) -> Result<&Descriptors> {
        Ok(self.input(port_set, rank)?.descriptor())
    }

    /// 下一条消息的生产者轮次。
    pub fn next_source(&self) -> SourceSlot {
        let producer = self.metadata.producer();
        let ranks = u64::from(producer.ranks());
        SourceSlot {
            rank: (self.sequence % ranks) as u32,
            buffer: ((self.sequence / ranks) % u64::from(producer.buffer_count())) as u32,
        }
    }

    /// 已提交的消息数。
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn require(&self, expected: FlowControl) -> Result<()> {
        let actual = self.metadata.flow();
        if actual != expected {
            return Err(DataplaneError::FlowControlMismatch { expected, actual });
        }
        Ok(())
    }

    fn check_turn(&self, rank: u32) -> Result<()> {
        let slot = self.next_source();
        let buffer = self.output(rank)?.cursor();
        if slot.rank != rank || slot.buffer != buffer {
            return Err(DataplaneError::OutOfOrderTransfer {
                expected_rank: slot.rank,
                expected_buffer: slot.buffer,
                rank,
                buffer,
            });
        }
        Ok(())
    }

    /// 推模式：按模板把生产 rank `rank` 的待提交输出拷贝到全部目标。
    pub fn advance_output(&mut self, rank: u32) -> Result<TransferOutcome> {
        self.require(FlowControl::Push)?;
        self.check_turn(rank)?;
        let template = self
            .template
            .clone()
            .ok_or_else(|| DataplaneError::topology("push circuit has no transfer template"))?;
        let step = template.step(self.sequence);
        let Self {
            id,
            outputs,
            inputs,
            scratch,
            sequence,
            ..
        } = self;
        let output = &mut outputs[rank as usize];
        let pending = output.pending().ok_or(DataplaneError::OutputNotSet { rank })?;
        let message_len = pending.length;

        for op in &step.ops {
            let port = &inputs[op.port_set as usize][op.rank as usize];
            let copy_len = op.length.min(message_len.saturating_sub(op.source_offset));
            let capacity = port.buffers().capacity().saturating_sub(op.target_offset);
            if copy_len > capacity {
                return Err(DataplaneError::MessageTooLarge {
                    length: u64::from(copy_len),
                    capacity: u64::from(capacity),
                });
            }
            if port.buffers().is_full(op.target_buffer)? {
                tracing::warn!(
                    circuit.id = %id,
                    port_set.ordinal = op.port_set,
                    port.rank = op.rank,
                    transfer.target_buffer = op.target_buffer,
                    transfer.sequence = *sequence,
                    "target buffer still full; transfer blocked"
                );
                return Ok(TransferOutcome::Blocked {
                    port_set: op.port_set,
                    rank: op.rank,
                    target_buffer: op.target_buffer,
                });
            }
        }

        scratch.resize(message_len as usize, 0);
        output
            .buffers()
            .read(step.source_buffer, 0, &mut scratch[..message_len as usize])?;
        for op in &step.ops {
            let port = &inputs[op.port_set as usize][op.rank as usize];
            let copy_len = op.length.min(message_len.saturating_sub(op.source_offset));
            let start = op.source_offset as usize;
            let data = scratch.get(start..start + copy_len as usize).unwrap_or(&[]);
            port.buffers().write(op.target_buffer, op.target_offset, data)?;
            let meta = BufferMetaData {
                length: copy_len,
                opcode: pending.opcode,
                end_of_whole: op.end_of_whole,
                parts_per_whole: op.parts_per_whole,
                sequence: *sequence as u32,
                part_offset: op.source_offset,
            };
            port.buffers().mark_filled(op.target_buffer, &meta)?;
        }

        output.take_pending();
        output.advance();
        let delivered = *sequence;
        *sequence += 1;
        tracing::trace!(
            circuit.id = %id,
            transfer.sequence = delivered,
            transfer.targets = step.ops.len(),
            "message delivered"
        );
        Ok(TransferOutcome::Delivered {
            sequence: delivered,
            targets: step.ops.len(),
        })
    }

    /// 拉模式：在生产者自己的当前缓冲上写元数据并置满。
    pub fn publish(&mut self, rank: u32) -> Result<TransferOutcome> {
        self.require(FlowControl::Pull)?;
        self.check_turn(rank)?;
        let sequence = self.sequence;
        let output = &mut self.outputs[rank as usize];
        let buffer = output.cursor();
        if !output.is_free()? {
            return Ok(TransferOutcome::Busy { rank, buffer });
        }
        let pending = output.pending().ok_or(DataplaneError::OutputNotSet { rank })?;
        let meta = BufferMetaData::whole(pending.length, pending.opcode, sequence as u32);
        output.buffers().mark_filled(buffer, &meta)?;
        output.take_pending();
        output.advance();
        self.sequence += 1;
        tracing::trace!(
            circuit.id = %self.id,
            transfer.sequence = sequence,
            "message published for pull"
        );
        Ok(TransferOutcome::Delivered {
            sequence,
            targets: 1,
        })
    }

    /// 写入、设置输出并提交，按连接的流控模式分派。
    pub fn send(&mut self, rank: u32, data: &[u8], opcode: u8) -> Result<TransferOutcome> {
        self.check_turn(rank)?;
        let flow = self.metadata.flow();
        let output = self.output_mut(rank)?;
        let length = u32::try_from(data.len()).map_err(|_| DataplaneError::MessageTooLarge {
            length: data.len() as u64,
            capacity: u64::from(u32::MAX),
        })?;
        if flow == FlowControl::Pull && !output.is_free()? {
            return Ok(TransferOutcome::Busy {
                rank,
                buffer: output.cursor(),
            });
        }
        output.set_output(length, opcode)?;
        output.write(0, data)?;
        match flow {
            FlowControl::Push => self.advance_output(rank),
            FlowControl::Pull => self.publish(rank),
        }
    }

    /// 单次检查消费端口的当前缓冲。
    ///
    /// 拉模式下若本地缓冲为空，则检查生产者缓冲，就绪时拉取到本地、置满并释放生产者缓冲。
    pub fn poll_input(&mut self, port_set: u32, rank: u32) -> Result<Option<BufferMetaData>> {
        let port = self.input(port_set, rank)?;
        if let Some(meta) = port.poll()? {
            return Ok(Some(meta));
        }
        if self.metadata.flow() == FlowControl::Push {
            return Ok(None);
        }

        let source_buffers = u64::from(self.metadata.producer().buffer_count());
        let index = (self.pulled % source_buffers) as u32;
        let Self {
            id,
            inputs,
            puller,
            scratch,
            pulled,
            ..
        } = self;
        let driver = puller
            .as_ref()
            .ok_or_else(|| DataplaneError::topology("pull circuit has no driver"))?;
        let port = &inputs[port_set as usize][rank as usize];
        let cursor = port.cursor();
        let capacity = port.buffers().capacity();
        let PullStatus::Ready(meta) = driver.check_buffer_empty(index, capacity)? else {
            return Ok(None);
        };
        scratch.resize(meta.length as usize, 0);
        if driver.pull(index, &mut scratch[..])?.is_none() {
            return Ok(None);
        }
        port.buffers().write(cursor, 0, &scratch[..])?;
        port.buffers().mark_filled(cursor, &meta)?;
        driver.release(index)?;
        *pulled += 1;
        tracing::trace!(
            circuit.id = %id,
            transfer.sequence = meta.sequence,
            "message pulled"
        );
        Ok(Some(meta))
    }

    /// 在预算内等待消费端口就绪。
    pub fn wait_input(
        &mut self,
        port_set: u32,
        rank: u32,
        budget: PollBudget,
    ) -> Result<BufferMetaData> {
        budget.run(|| self.poll_input(port_set, rank))
    }

    /// 检查、读出并释放当前缓冲；无数据时返回 `None`。
    pub fn receive(
        &mut self,
        port_set: u32,
        rank: u32,
        out: &mut Vec<u8>,
    ) -> Result<Option<BufferMetaData>> {
        let Some(meta) = self.poll_input(port_set, rank)? else {
            return Ok(None);
        };
        out.clear();
        out.resize(meta.length as usize, 0);
        self.input(port_set, rank)?.read(0, out)?;
        self.release_input(port_set, rank)?;
        Ok(Some(meta))
    }

    /// 消费完成：清满标志、置空标志并前进游标。
    pub fn release_input(&mut self, port_set: u32, rank: u32) -> Result<()> {
        self.input_mut(port_set, rank)?.release()
    }

    /// 拉模式下供外部驱动使用的生产者缓冲描述。
    pub fn pull_info(&self, port_set: u32, rank: u32) -> Result<PullDataInfo> {
        self.require(FlowControl::Pull)?;
        self.input(port_set, rank)?;
        producer_pull_info(&self.outputs)
    }
}

fn producer_pull_info(outputs: &[OutputPort]) -> Result<PullDataInfo> {
    let producer = outputs
        .first()
        .ok_or_else(|| DataplaneError::index("producer rank", 0u32, 0u32))?;
    PullDataInfo::new(producer.buffers().region().clone(), *producer.descriptor())
}

impl Drop for Circuit {
    fn drop(&mut self) {
        tracing::debug!(
            circuit.id = %self.id,
            transfer.sequence = self.sequence,
            "circuit torn down"
        );
    }
}

impl core::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Circuit")
            .field("id", &self.id)
            .field("flow", &self.metadata.flow())
            .field("producer_ranks", &self.outputs.len())
            .field("port_sets", &self.inputs.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}
